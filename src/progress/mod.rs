//! Progress reporting for terminal output.
//!
//! Live task list with colored status icons, driven by the batch evaluator
//! through [`BatchObserver`]. Silenced with `--quiet`.

use std::io::{self, Write};
use std::sync::{Mutex, MutexGuard};

use colored::Colorize;
use indexmap::IndexMap;

use crate::batch::BatchObserver;
use crate::evaluator::EvaluatorEvent;
use crate::models::{EvaluationTask, RuleOutcome};

/// Status of a single evaluation task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskStatus {
    Pending,
    /// Being evaluated; carries the last tool the evaluator used.
    InProgress(Option<String>),
    Done { violations: usize },
    Failed(String),
}

/// Tracks and renders live progress for one batch.
///
/// Shared by reference with the batch evaluator, so state sits behind a
/// mutex.
pub struct ProgressTracker {
    inner: Mutex<ProgressState>,
    /// If false, all output is suppressed.
    enabled: bool,
}

struct ProgressState {
    /// task id → status, in batch order.
    tasks: IndexMap<String, TaskStatus>,
    rendered_lines: usize,
}

impl ProgressTracker {
    /// Tasks are registered when the batch announces them.
    pub fn new(enabled: bool) -> Self {
        Self {
            inner: Mutex::new(ProgressState {
                tasks: IndexMap::new(),
                rendered_lines: 0,
            }),
            enabled,
        }
    }

    fn state(&self) -> MutexGuard<'_, ProgressState> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Update the status of a task and re-render.
    pub fn update(&self, task_id: &str, status: TaskStatus) {
        let mut state = self.state();
        state.tasks.insert(task_id.to_string(), status);
        if self.enabled {
            Self::render(&mut state);
        }
    }

    pub fn status(&self, task_id: &str) -> Option<TaskStatus> {
        self.state().tasks.get(task_id).cloned()
    }

    /// Register `tasks` as pending and print the initial listing.
    pub fn start(&self, tasks: &[EvaluationTask]) {
        let mut state = self.state();
        for task in tasks {
            state.tasks.insert(task.task_id.clone(), TaskStatus::Pending);
        }
        if self.enabled {
            Self::render(&mut state);
        }
    }

    /// Clear the live display and print one final line per task.
    pub fn finish(&self) {
        let mut state = self.state();
        if !self.enabled || state.tasks.is_empty() {
            return;
        }
        Self::clear_lines(state.rendered_lines);
        state.rendered_lines = 0;

        let stderr = io::stderr();
        let mut handle = stderr.lock();
        for (task_id, status) in &state.tasks {
            let (icon, text) = Self::describe(status);
            let _ = writeln!(handle, "  {icon} {} {text}", task_id.dimmed());
        }
        let _ = writeln!(handle);
    }

    fn describe(status: &TaskStatus) -> (String, String) {
        match status {
            TaskStatus::Pending => ("○".dimmed().to_string(), "waiting".dimmed().to_string()),
            TaskStatus::InProgress(None) => ("◌".cyan().bold().to_string(), "evaluating…".cyan().to_string()),
            TaskStatus::InProgress(Some(tool)) => (
                "◌".cyan().bold().to_string(),
                format!("evaluating… ({tool})").cyan().to_string(),
            ),
            TaskStatus::Done { violations: 0 } => ("✔".green().bold().to_string(), "clean".green().to_string()),
            TaskStatus::Done { violations } => (
                "✔".yellow().bold().to_string(),
                format!("{violations} violation(s)").yellow().to_string(),
            ),
            TaskStatus::Failed(reason) => ("✖".red().bold().to_string(), reason.red().to_string()),
        }
    }

    /// Render the current state to stderr, clearing previous output.
    fn render(state: &mut ProgressState) {
        Self::clear_lines(state.rendered_lines);

        let stderr = io::stderr();
        let mut handle = stderr.lock();
        let _ = writeln!(
            handle,
            "  {} Evaluating {} task(s)",
            "▸".cyan().bold(),
            state.tasks.len(),
        );
        let mut lines = 1;

        for (task_id, status) in &state.tasks {
            let (icon, text) = Self::describe(status);
            let _ = writeln!(handle, "    {icon} {} {text}", task_id.dimmed());
            lines += 1;
        }

        let _ = handle.flush();
        state.rendered_lines = lines;
    }

    /// Move cursor up and clear `n` lines.
    fn clear_lines(n: usize) {
        if n == 0 {
            return;
        }
        let stderr = io::stderr();
        let mut handle = stderr.lock();
        for _ in 0..n {
            let _ = write!(handle, "\x1b[1A\x1b[2K");
        }
        let _ = handle.flush();
    }
}

impl BatchObserver for ProgressTracker {
    fn on_batch(&self, tasks: &[EvaluationTask]) {
        self.start(tasks);
    }

    fn on_start(&self, _index: usize, _total: usize, task: &EvaluationTask) {
        self.update(&task.task_id, TaskStatus::InProgress(None));
    }

    fn on_event(&self, task: &EvaluationTask, event: &EvaluatorEvent) {
        if let EvaluatorEvent::ToolUse { name, .. } = event {
            self.update(&task.task_id, TaskStatus::InProgress(Some(name.clone())));
        }
    }

    fn on_result(&self, _index: usize, _total: usize, outcome: &RuleOutcome) {
        let status = match outcome {
            RuleOutcome::Success(result) => TaskStatus::Done {
                violations: result.violations.len(),
            },
            RuleOutcome::Error(failure) => TaskStatus::Failed(failure.message.clone()),
        };
        self.update(outcome.task_id(), status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::EvaluationFailure;
    use crate::models::task::fixtures;
    use serde_json::json;

    #[test]
    fn tracker_disabled_no_panic() {
        let tasks = vec![fixtures::task("no-print", "a.py", "h", None)];
        let tracker = ProgressTracker::new(false);
        tracker.start(&tasks);
        tracker.update("no-print_a.py", TaskStatus::InProgress(None));
        tracker.update("no-print_a.py", TaskStatus::Done { violations: 0 });
        tracker.finish();
    }

    #[test]
    fn observer_callbacks_drive_status() {
        let tasks = vec![
            fixtures::task("no-print", "a.py", "h", None),
            fixtures::task("naming", "a.py", "h", None),
        ];
        let tracker = ProgressTracker::new(false);
        assert_eq!(tracker.status("naming_a.py"), None);
        tracker.on_batch(&tasks);
        assert_eq!(tracker.status("naming_a.py"), Some(TaskStatus::Pending));

        tracker.on_start(1, 2, &tasks[0]);
        tracker.on_event(
            &tasks[0],
            &EvaluatorEvent::ToolUse {
                name: "Read".into(),
                input: json!({}),
            },
        );
        assert_eq!(
            tracker.status("no-print_a.py"),
            Some(TaskStatus::InProgress(Some("Read".into())))
        );

        tracker.on_result(
            2,
            2,
            &RuleOutcome::Error(EvaluationFailure {
                task_id: "naming_a.py".into(),
                message: "agent crashed".into(),
                rule_name: "naming".into(),
                file_path: "a.py".into(),
            }),
        );
        assert_eq!(
            tracker.status("naming_a.py"),
            Some(TaskStatus::Failed("agent crashed".into()))
        );
    }
}
