//! Review pipeline: task building, cache partitioning, batch evaluation and
//! aggregation for one commit of a change set.
//!
//! Layout under the output root:
//!
//! ```text
//! <root>/evaluations/<commit>/   results, snapshots, transcripts
//! <root>/tasks/<commit>/         snapshots of the tasks built for the commit
//! ```

use std::collections::HashSet;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::aggregate::{EvaluationSummary, ResultAggregator, merge_into};
use crate::batch::{BatchEvaluator, BatchObserver};
use crate::cache::lock::CommitLocks;
use crate::cache::store::{ResultStore, StoreError};
use crate::cache::{ResultCache, discover_prior_dirs};
use crate::constants::{EVALUATIONS_DIR, TASKS_DIR};
use crate::evaluator::Evaluator;
use crate::git::BlobSource;
use crate::models::{EvaluationTask, FocusArea};
use crate::rules::RuleRepository;
use crate::tasks::{TaskBuilder, TaskError, write_snapshots};

/// Errors that stop a pipeline run before any task executes.
#[derive(Error, Debug)]
pub enum PipelineError {
    #[error(transparent)]
    Task(#[from] TaskError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("unknown task ids: {}", .0.join(", "))]
    UnknownTasks(Vec<String>),

    #[error("invalid commit identifier: {0:?}")]
    InvalidCommit(String),
}

/// What one run did.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RunReport {
    pub commit: String,
    pub summary: EvaluationSummary,
    /// Outcomes evaluated during this run.
    pub fresh: usize,
    /// Outcomes reused from the cache.
    pub cached: usize,
    /// Task ids copied in from a prior commit.
    pub migrated: Vec<String>,
    pub cancelled: bool,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} new, {} cached, {} total",
            self.fresh, self.cached, self.summary.total_tasks
        )
    }
}

/// Runs reviews for commits under one output root.
pub struct ReviewPipeline {
    rules: Arc<RuleRepository>,
    blobs: Arc<dyn BlobSource>,
    evaluator: Arc<dyn Evaluator>,
    output_root: PathBuf,
    repo_root: PathBuf,
    default_model: String,
    cache: ResultCache,
    locks: CommitLocks,
    cancel: CancellationToken,
}

impl ReviewPipeline {
    pub fn new(
        rules: Arc<RuleRepository>,
        blobs: Arc<dyn BlobSource>,
        evaluator: Arc<dyn Evaluator>,
        output_root: impl Into<PathBuf>,
        repo_root: impl Into<PathBuf>,
        default_model: impl Into<String>,
    ) -> Self {
        Self {
            rules,
            blobs,
            evaluator,
            output_root: output_root.into(),
            repo_root: repo_root.into(),
            default_model: default_model.into(),
            cache: ResultCache::new(true),
            locks: CommitLocks::new(),
            cancel: CancellationToken::new(),
        }
    }

    /// Disable cache lookups; every task is evaluated.
    pub fn with_cache(mut self, enabled: bool) -> Self {
        self.cache = ResultCache::new(enabled);
        self
    }

    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    /// Share a lock registry with other pipelines writing the same root.
    pub fn with_locks(mut self, locks: CommitLocks) -> Self {
        self.locks = locks;
        self
    }

    pub fn rules(&self) -> &RuleRepository {
        &self.rules
    }

    pub fn evaluations_root(&self) -> PathBuf {
        self.output_root.join(EVALUATIONS_DIR)
    }

    pub fn result_store(&self, commit: &str) -> Result<ResultStore, PipelineError> {
        result_store(&self.output_root, commit)
    }

    pub fn task_store(&self, commit: &str) -> Result<ResultStore, PipelineError> {
        validate_commit(commit)?;
        Ok(ResultStore::new(self.output_root.join(TASKS_DIR).join(commit)))
    }

    /// Build the tasks for `commit` and persist their snapshots.
    pub async fn prepare(&self, commit: &str, focus_areas: &[FocusArea]) -> Result<Vec<EvaluationTask>, PipelineError> {
        let task_store = self.task_store(commit)?;
        let mut builder = TaskBuilder::new(Arc::clone(&self.blobs), commit);
        let tasks = builder.build(&self.rules, focus_areas).await;
        let written = write_snapshots(&task_store, &tasks).await?;
        tracing::info!(commit, tasks = tasks.len(), written, "built evaluation tasks");
        Ok(tasks)
    }

    /// Full run: evaluate every task not satisfied by the cache.
    pub async fn run(
        &self,
        commit: &str,
        focus_areas: &[FocusArea],
        observer: &dyn BatchObserver,
    ) -> Result<RunReport, PipelineError> {
        let store = self.result_store(commit)?;
        let _guard = self.locks.acquire(store.dir()).await;

        let tasks = self.prepare(commit, focus_areas).await?;
        let prior = discover_prior_dirs(&self.evaluations_root(), store.dir()).await;
        let partition = self.cache.partition(tasks, &store, &prior).await;

        let batch = self.batch(store);
        let run = batch.run_batch(&partition.to_evaluate, observer).await;

        let mut aggregator = ResultAggregator::new();
        aggregator.merge(partition.cached.iter().cloned());
        aggregator.merge(run.outcomes.iter().cloned());

        let report = RunReport {
            commit: commit.to_string(),
            summary: aggregator.summary(),
            fresh: run.outcomes.len(),
            cached: partition.cached.len(),
            migrated: partition.migrated,
            cancelled: run.cancelled,
        };
        tracing::info!(commit, %report, violations = report.summary.violations_found, "run finished");
        Ok(report)
    }

    /// Selective rerun: evaluate `task_ids` regardless of the cache and
    /// merge their outcomes into the commit's existing results.
    ///
    /// The existing summary holds the stored outcomes of the selected tasks
    /// plus the cache hits among the other tasks; fresh outcomes replace
    /// entries by task id. A cancelled rerun keeps the stored outcomes of
    /// the tasks it did not reach. Tasks outside the selection are never
    /// evaluated here, and with the cache disabled they contribute nothing.
    pub async fn rerun(
        &self,
        commit: &str,
        focus_areas: &[FocusArea],
        task_ids: &[String],
        observer: &dyn BatchObserver,
    ) -> Result<RunReport, PipelineError> {
        let store = self.result_store(commit)?;
        let _guard = self.locks.acquire(store.dir()).await;

        let tasks = self.prepare(commit, focus_areas).await?;
        let known: HashSet<&str> = tasks.iter().map(|t| t.task_id.as_str()).collect();
        let unknown: Vec<String> = task_ids
            .iter()
            .filter(|id| !known.contains(id.as_str()))
            .cloned()
            .collect();
        if !unknown.is_empty() {
            return Err(PipelineError::UnknownTasks(unknown));
        }

        let selected: HashSet<&str> = task_ids.iter().map(String::as_str).collect();
        let (chosen, rest): (Vec<_>, Vec<_>) = tasks
            .into_iter()
            .partition(|t| selected.contains(t.task_id.as_str()));

        let prior = discover_prior_dirs(&self.evaluations_root(), store.dir()).await;
        let partition = self.cache.partition(rest, &store, &prior).await;
        let mut stored = partition.cached.clone();
        for task in &chosen {
            if let Some(outcome) = store.read_outcome(&task.task_id).await {
                stored.push(outcome);
            }
        }
        let existing = EvaluationSummary::from_outcomes(stored);

        let batch = self.batch(store);
        let run = batch.run_batch(&chosen, observer).await;

        let report = RunReport {
            commit: commit.to_string(),
            summary: merge_into(&existing, run.outcomes.iter().cloned()),
            fresh: run.outcomes.len(),
            cached: partition.cached.len(),
            migrated: partition.migrated,
            cancelled: run.cancelled,
        };
        tracing::info!(commit, %report, "rerun finished");
        Ok(report)
    }

    /// Summary of everything stored for `commit`.
    pub async fn stored_summary(&self, commit: &str) -> Result<EvaluationSummary, PipelineError> {
        let store = self.result_store(commit)?;
        let outcomes = store.load_all_outcomes().await?;
        Ok(EvaluationSummary::from_outcomes(outcomes))
    }

    fn batch(&self, store: ResultStore) -> BatchEvaluator {
        BatchEvaluator::new(
            Arc::clone(&self.evaluator),
            store,
            self.default_model.clone(),
            self.repo_root.clone(),
        )
        .with_cancellation(self.cancel.clone())
    }
}

/// The result store of `commit` under `output_root`.
pub fn result_store(output_root: &Path, commit: &str) -> Result<ResultStore, PipelineError> {
    validate_commit(commit)?;
    Ok(ResultStore::new(output_root.join(EVALUATIONS_DIR).join(commit)))
}

/// Commit identifiers become directory names.
fn validate_commit(commit: &str) -> Result<(), PipelineError> {
    let valid = !commit.is_empty()
        && commit != "."
        && commit != ".."
        && !commit.contains(['/', '\\'])
        && Path::new(commit).components().count() == 1;
    if valid {
        Ok(())
    } else {
        Err(PipelineError::InvalidCommit(commit.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::batch::NoopObserver;
    use crate::evaluator::{EvaluationRequest, EvaluatorError, EvaluatorEvent, EvaluatorResult, EventStream};
    use crate::git::GitError;
    use crate::models::task::fixtures;
    use async_trait::async_trait;
    use futures::StreamExt;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedBlobs;

    #[async_trait]
    impl BlobSource for FixedBlobs {
        async fn file_blob_hash(&self, _commit: &str, file_path: &str) -> Result<String, GitError> {
            Ok(format!("blob-{file_path}"))
        }
        async fn rule_blob_hash(&self, _rule_path: &Path) -> Result<String, GitError> {
            Ok("rule-blob".into())
        }
    }

    #[derive(Default)]
    struct CountingEvaluator {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl crate::evaluator::Evaluator for CountingEvaluator {
        async fn evaluate(&self, _request: &EvaluationRequest) -> Result<EventStream, EvaluatorError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(futures::stream::iter([Ok(EvaluatorEvent::Result(EvaluatorResult {
                structured_output: Some(json!({"violates_rule": true, "score": 8, "comment": "nope"})),
                cost_usd: Some(0.1),
                duration_ms: 5,
            }))])
            .boxed())
        }
    }

    fn pipeline(root: &Path, evaluator: Arc<CountingEvaluator>) -> ReviewPipeline {
        let rules = RuleRepository::from_rules("rules", vec![fixtures::rule("no-print"), fixtures::rule("naming")])
            .unwrap();
        ReviewPipeline::new(Arc::new(rules), Arc::new(FixedBlobs), evaluator, root, ".", "sonnet")
    }

    #[tokio::test]
    async fn second_run_is_fully_cached() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = Arc::new(CountingEvaluator::default());
        let pipeline = pipeline(dir.path(), Arc::clone(&evaluator));
        let focus = vec![fixtures::focus("a.py")];

        let first = pipeline.run("c1", &focus, &NoopObserver).await.unwrap();
        assert_eq!(first.to_string(), "2 new, 0 cached, 2 total");
        assert_eq!(first.summary.violations_found, 2);

        let second = pipeline.run("c1", &focus, &NoopObserver).await.unwrap();
        assert_eq!(second.to_string(), "0 new, 2 cached, 2 total");
        assert_eq!(second.summary, first.summary);
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 2);
        assert!(dir.path().join("tasks/c1/task-no-print_a.py.json").exists());
    }

    #[tokio::test]
    async fn rerun_bypasses_cache_for_selected_tasks() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = Arc::new(CountingEvaluator::default());
        let pipeline = pipeline(dir.path(), Arc::clone(&evaluator));
        let focus = vec![fixtures::focus("a.py")];

        pipeline.run("c1", &focus, &NoopObserver).await.unwrap();
        let report = pipeline
            .rerun("c1", &focus, &["naming_a.py".to_string()], &NoopObserver)
            .await
            .unwrap();

        assert_eq!(report.fresh, 1);
        assert_eq!(report.cached, 1);
        assert_eq!(report.summary.total_tasks, 2);
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_rerun_keeps_stored_outcomes() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = Arc::new(CountingEvaluator::default());
        let focus = vec![fixtures::focus("a.py")];
        let first = pipeline(dir.path(), Arc::clone(&evaluator))
            .run("c1", &focus, &NoopObserver)
            .await
            .unwrap();

        let token = CancellationToken::new();
        token.cancel();
        let report = pipeline(dir.path(), Arc::clone(&evaluator))
            .with_cancellation(token)
            .rerun("c1", &focus, &["naming_a.py".to_string()], &NoopObserver)
            .await
            .unwrap();

        assert!(report.cancelled);
        assert_eq!(report.fresh, 0);
        assert_eq!(report.summary.total_tasks, 2);
        assert_eq!(report.summary.violations_found, first.summary.violations_found);
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn rerun_with_disabled_cache_reuses_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = Arc::new(CountingEvaluator::default());
        let focus = vec![fixtures::focus("a.py")];
        pipeline(dir.path(), Arc::clone(&evaluator))
            .run("c1", &focus, &NoopObserver)
            .await
            .unwrap();

        let report = pipeline(dir.path(), Arc::clone(&evaluator))
            .with_cache(false)
            .rerun("c1", &focus, &["naming_a.py".to_string()], &NoopObserver)
            .await
            .unwrap();

        assert_eq!(report.cached, 0);
        assert_eq!(report.fresh, 1);
        assert_eq!(report.summary.total_tasks, 1);
        assert_eq!(report.summary.outcomes[0].task_id(), "naming_a.py");
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rerun_rejects_unknown_ids() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), Arc::new(CountingEvaluator::default()));
        let err = pipeline
            .rerun("c1", &[fixtures::focus("a.py")], &["missing".to_string()], &NoopObserver)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::UnknownTasks(ids) if ids == vec!["missing".to_string()]));
    }

    #[tokio::test]
    async fn commit_must_be_a_single_path_component() {
        let dir = tempfile::tempdir().unwrap();
        let pipeline = pipeline(dir.path(), Arc::new(CountingEvaluator::default()));
        for bad in ["", "..", "a/b", "a\\b"] {
            assert!(matches!(
                pipeline.run(bad, &[], &NoopObserver).await,
                Err(PipelineError::InvalidCommit(_))
            ));
        }
    }

    #[tokio::test]
    async fn disabled_cache_evaluates_everything() {
        let dir = tempfile::tempdir().unwrap();
        let evaluator = Arc::new(CountingEvaluator::default());
        let pipeline = pipeline(dir.path(), Arc::clone(&evaluator)).with_cache(false);
        let focus = vec![fixtures::focus("a.py")];

        pipeline.run("c1", &focus, &NoopObserver).await.unwrap();
        let second = pipeline.run("c1", &focus, &NoopObserver).await.unwrap();
        assert_eq!(second.fresh, 2);
        assert_eq!(evaluator.calls.load(Ordering::SeqCst), 4);
    }
}
