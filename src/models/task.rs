//! Evaluation tasks and their persisted snapshots.

use serde::{Deserialize, Serialize};

use super::focus::FocusArea;
use super::rule::Rule;

/// One (rule, focus area) pairing: the unit of caching and execution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationTask {
    /// Deterministic id derived from the rule name and focus id.
    pub task_id: String,
    pub rule: Rule,
    pub focus_area: FocusArea,
    /// Content hash of the target file at the evaluated commit.
    pub git_blob_hash: String,
    /// Content hash of the rule definition. Absent in snapshots written
    /// before rule hashing existed.
    #[serde(default)]
    pub rule_blob_hash: Option<String>,
}

impl EvaluationTask {
    /// Create a task, deriving its id from the pairing.
    pub fn new(
        rule: Rule,
        focus_area: FocusArea,
        git_blob_hash: String,
        rule_blob_hash: Option<String>,
    ) -> Self {
        let task_id = Self::task_id_for(&rule.name, &focus_area.focus_id);
        Self {
            task_id,
            rule,
            focus_area,
            git_blob_hash,
            rule_blob_hash,
        }
    }

    /// The id of the task pairing `rule_name` with `focus_id`.
    pub fn task_id_for(rule_name: &str, focus_id: &str) -> String {
        format!("{rule_name}_{focus_id}")
    }

    /// Model to evaluate with: the rule's override, else `default`.
    pub fn model<'a>(&'a self, default: &'a str) -> &'a str {
        self.rule.model.as_deref().unwrap_or(default)
    }
}

/// Frozen copy of a task as it existed when its outcome was computed.
///
/// Only ever compared against a fresh task to decide cache validity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskSnapshot(pub EvaluationTask);

impl TaskSnapshot {
    pub fn of(task: &EvaluationTask) -> Self {
        Self(task.clone())
    }

    pub fn task(&self) -> &EvaluationTask {
        &self.0
    }

    /// A stored outcome is reusable for `task` only when both content
    /// hashes are unchanged. Two missing rule hashes count as equal.
    pub fn is_valid_for(&self, task: &EvaluationTask) -> bool {
        self.0.git_blob_hash == task.git_blob_hash && self.0.rule_blob_hash == task.rule_blob_hash
    }
}
