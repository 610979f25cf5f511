//! Evaluation outcomes: the success-or-error result of one task.

use serde::{Deserialize, Serialize};

/// A flagged rule breach.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Violation {
    /// Severity from 1 (minor) to 10 (severe).
    pub score: u8,
    pub comment: String,
    pub file_path: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line_number: Option<u32>,
}

/// A completed evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    pub task_id: String,
    pub rule_name: String,
    pub file_path: String,
    #[serde(default)]
    pub violations: Vec<Violation>,
    pub model_used: String,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub documentation_link: Option<String>,
}

/// A task whose evaluation failed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationFailure {
    pub task_id: String,
    pub message: String,
    pub rule_name: String,
    pub file_path: String,
}

/// Outcome of evaluating one task. Persisted as `data-<task_id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum RuleOutcome {
    Success(RuleResult),
    Error(EvaluationFailure),
}

impl RuleOutcome {
    pub fn task_id(&self) -> &str {
        match self {
            Self::Success(result) => &result.task_id,
            Self::Error(failure) => &failure.task_id,
        }
    }

    pub fn rule_name(&self) -> &str {
        match self {
            Self::Success(result) => &result.rule_name,
            Self::Error(failure) => &failure.rule_name,
        }
    }

    pub fn file_path(&self) -> &str {
        match self {
            Self::Success(result) => &result.file_path,
            Self::Error(failure) => &failure.file_path,
        }
    }

    /// Violations reported by a successful evaluation; empty for errors.
    pub fn violations(&self) -> &[Violation] {
        match self {
            Self::Success(result) => &result.violations,
            Self::Error(_) => &[],
        }
    }

    pub fn cost_usd(&self) -> f64 {
        match self {
            Self::Success(result) => result.cost_usd.unwrap_or(0.0),
            Self::Error(_) => 0.0,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        match self {
            Self::Success(result) => result.duration_ms,
            Self::Error(_) => 0,
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self, Self::Error(_))
    }
}
