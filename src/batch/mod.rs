//! Batch evaluator: runs outstanding tasks one at a time.
//!
//! Each task's evaluator call completes before the next one starts. A
//! failing task becomes a [`RuleOutcome::Error`] and the batch moves on.
//! Every outcome is persisted as soon as it is computed, so an interrupted
//! batch leaves all finished work on disk for the next run to reuse. A task's
//! old snapshot and transcripts are removed before it is evaluated, and the
//! new snapshot is written only after its outcome.

pub mod transcript;

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;

use futures::{FutureExt, StreamExt};
use tokio_util::sync::CancellationToken;

use crate::cache::store::ResultStore;
use crate::evaluator::{
    EvaluationRequest, Evaluator, EvaluatorError, EvaluatorEvent, EvaluatorResult, map_structured_output,
};
use crate::models::{EvaluationFailure, EvaluationTask, RuleOutcome, TaskSnapshot};
use transcript::Transcript;

/// Receives batch progress. All methods default to no-ops.
pub trait BatchObserver: Send + Sync {
    /// The batch is about to evaluate `tasks`, in this order.
    fn on_batch(&self, _tasks: &[EvaluationTask]) {}

    /// A task is about to be evaluated. `index` is 1-based.
    fn on_start(&self, _index: usize, _total: usize, _task: &EvaluationTask) {}

    /// The evaluator emitted an intermediate event for `task`.
    fn on_event(&self, _task: &EvaluationTask, _event: &EvaluatorEvent) {}

    /// A task finished (successfully or not) and was persisted.
    fn on_result(&self, _index: usize, _total: usize, _outcome: &RuleOutcome) {}
}

/// Observer that ignores everything.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopObserver;

impl BatchObserver for NoopObserver {}

/// Outcomes of one batch.
#[derive(Debug, Default)]
pub struct BatchRun {
    /// One outcome per task that ran, in task order.
    pub outcomes: Vec<RuleOutcome>,
    /// The batch stopped early because it was cancelled.
    pub cancelled: bool,
}

/// Runs tasks against an evaluator and persists each outcome.
pub struct BatchEvaluator {
    evaluator: Arc<dyn Evaluator>,
    store: ResultStore,
    default_model: String,
    repo_root: PathBuf,
    cancel: CancellationToken,
}

impl BatchEvaluator {
    pub fn new(
        evaluator: Arc<dyn Evaluator>,
        store: ResultStore,
        default_model: impl Into<String>,
        repo_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            evaluator,
            store,
            default_model: default_model.into(),
            repo_root: repo_root.into(),
            cancel: CancellationToken::new(),
        }
    }

    /// Stop between tasks once `token` is cancelled.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn store(&self) -> &ResultStore {
        &self.store
    }

    /// Evaluate `tasks` in order.
    ///
    /// Cancellation is checked before each task, never during one.
    pub async fn run_batch(&self, tasks: &[EvaluationTask], observer: &dyn BatchObserver) -> BatchRun {
        let total = tasks.len();
        let mut run = BatchRun::default();
        observer.on_batch(tasks);

        for (i, task) in tasks.iter().enumerate() {
            if self.cancel.is_cancelled() {
                tracing::info!(completed = i, total, "batch cancelled");
                run.cancelled = true;
                break;
            }
            let index = i + 1;
            observer.on_start(index, total, task);

            if let Err(e) = self.store.clear_task(&task.task_id).await {
                tracing::warn!(task_id = %task.task_id, "failed to clear previous artifacts: {e}");
            }
            let outcome = self.evaluate_one(task, observer).await;
            self.persist(task, &outcome).await;

            observer.on_result(index, total, &outcome);
            run.outcomes.push(outcome);
        }

        run
    }

    async fn evaluate_one(&self, task: &EvaluationTask, observer: &dyn BatchObserver) -> RuleOutcome {
        let request = EvaluationRequest::new(task.clone(), &self.default_model, &self.repo_root);
        let mut transcript = Transcript::new(&request);

        let attempt = AssertUnwindSafe(self.drive(&request, &mut transcript, observer))
            .catch_unwind()
            .await;
        let result = match attempt {
            Ok(result) => result,
            Err(_) => Err(EvaluatorError::Stream("evaluator panicked".to_string())),
        };

        if !transcript.is_empty() {
            if let Err(e) = self
                .store
                .write_transcript(&task.task_id, &transcript.to_json(), &transcript.to_markdown())
                .await
            {
                tracing::warn!(task_id = %task.task_id, "failed to write transcript: {e}");
            }
        }

        match result {
            Ok(result) => {
                let mapped = map_structured_output(task, &request.model, &result);
                tracing::debug!(
                    task_id = %task.task_id,
                    violations = mapped.violations.len(),
                    "task evaluated"
                );
                RuleOutcome::Success(mapped)
            }
            Err(e) => {
                tracing::warn!(task_id = %task.task_id, "evaluation failed: {e}");
                RuleOutcome::Error(EvaluationFailure {
                    task_id: task.task_id.clone(),
                    message: e.to_string(),
                    rule_name: task.rule.name.clone(),
                    file_path: task.focus_area.file_path.clone(),
                })
            }
        }
    }

    /// Consume the evaluator stream, returning its terminal result.
    async fn drive(
        &self,
        request: &EvaluationRequest,
        transcript: &mut Transcript,
        observer: &dyn BatchObserver,
    ) -> Result<EvaluatorResult, EvaluatorError> {
        let mut stream = self.evaluator.evaluate(request).await?;
        let mut last = None;
        while let Some(event) = stream.next().await {
            let event = event?;
            transcript.record(&event);
            match event {
                EvaluatorEvent::Result(result) => last = Some(result),
                other => observer.on_event(&request.task, &other),
            }
        }
        last.ok_or(EvaluatorError::NoResult)
    }

    /// Write the outcome, then the snapshot it was computed for.
    ///
    /// The snapshot goes last: an interrupted or failed write leaves the
    /// task without a snapshot, which reads as a miss.
    async fn persist(&self, task: &EvaluationTask, outcome: &RuleOutcome) {
        let written = match self.store.write_outcome(outcome).await {
            Ok(()) => self.store.write_snapshot(&TaskSnapshot::of(task)).await,
            Err(e) => Err(e),
        };
        if let Err(e) = written {
            tracing::warn!(task_id = %task.task_id, "failed to persist outcome: {e}");
        }
    }
}
