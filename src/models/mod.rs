//! Shared types used across all modules.
//!
//! This module defines the core data structures for rules, focus areas,
//! evaluation tasks, outcomes, and review comments. Other modules import
//! from here rather than reaching into each other's internals.

pub mod comment;
pub mod focus;
pub mod outcome;
pub mod rule;
pub mod task;

pub use comment::{PendingComment, PostedComment, ReconciledComment};
pub use focus::{FocusArea, FocusType};
pub use outcome::{EvaluationFailure, RuleOutcome, RuleResult, Violation};
pub use rule::Rule;
pub use task::{EvaluationTask, TaskSnapshot};

/// Default model used when neither the rule nor the config names one.
pub const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";

/// Minimum score for a violation to be rendered as a review comment.
pub const DEFAULT_MIN_SCORE: u8 = 5;
