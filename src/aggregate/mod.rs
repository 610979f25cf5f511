//! Result aggregation into an evaluation summary.
//!
//! The summary is always recomputed from the full outcome set. Merging
//! replaces outcomes by task id and then recomputes; totals are never
//! adjusted by deltas.

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::models::RuleOutcome;

/// Derived totals over a set of outcomes.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluationSummary {
    pub total_tasks: usize,
    pub violations_found: usize,
    pub errors: usize,
    pub total_cost_usd: f64,
    pub total_duration_ms: u64,
    pub outcomes: Vec<RuleOutcome>,
}

impl EvaluationSummary {
    /// Build a summary from scratch.
    pub fn from_outcomes(outcomes: Vec<RuleOutcome>) -> Self {
        let mut summary = Self {
            total_tasks: outcomes.len(),
            ..Self::default()
        };
        for outcome in &outcomes {
            summary.violations_found += outcome.violations().len();
            summary.total_cost_usd += outcome.cost_usd();
            summary.total_duration_ms += outcome.duration_ms();
            if outcome.is_error() {
                summary.errors += 1;
            }
        }
        summary.outcomes = outcomes;
        summary
    }

    /// Outcomes that carry at least one violation.
    pub fn with_violations(&self) -> impl Iterator<Item = &RuleOutcome> {
        self.outcomes.iter().filter(|o| !o.violations().is_empty())
    }
}

/// Keeps the current outcome set keyed by task id.
#[derive(Debug, Clone, Default)]
pub struct ResultAggregator {
    outcomes: IndexMap<String, RuleOutcome>,
}

impl ResultAggregator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start from an existing summary's outcomes.
    pub fn from_summary(summary: &EvaluationSummary) -> Self {
        let mut aggregator = Self::new();
        aggregator.merge(summary.outcomes.iter().cloned());
        aggregator
    }

    /// Upsert outcomes by task id. A replaced outcome keeps its position.
    pub fn merge(&mut self, outcomes: impl IntoIterator<Item = RuleOutcome>) {
        for outcome in outcomes {
            self.outcomes.insert(outcome.task_id().to_string(), outcome);
        }
    }

    pub fn len(&self) -> usize {
        self.outcomes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.outcomes.is_empty()
    }

    /// Recompute the summary from the current outcome set.
    pub fn summary(&self) -> EvaluationSummary {
        EvaluationSummary::from_outcomes(self.outcomes.values().cloned().collect())
    }
}

/// Merge `fresh` into `existing` and recompute.
pub fn merge_into(existing: &EvaluationSummary, fresh: impl IntoIterator<Item = RuleOutcome>) -> EvaluationSummary {
    let mut aggregator = ResultAggregator::from_summary(existing);
    aggregator.merge(fresh);
    aggregator.summary()
}
