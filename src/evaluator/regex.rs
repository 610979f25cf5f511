//! Regex evaluator for rules that declare a `violation_regex`.

use std::time::Instant;

use async_trait::async_trait;
use futures::StreamExt;
use regex::RegexBuilder;
use serde_json::json;

use super::{EvaluationRequest, EvaluatorError, EvaluatorEvent, EvaluatorResult, EventStream, Evaluator};

/// Score given to every regex match.
pub const REGEX_VIOLATION_SCORE: u8 = 5;

/// Model name recorded for regex evaluations.
pub const REGEX_MODEL: &str = "regex";

/// Reports each added line in the focus area that matches the rule's
/// `violation_regex`. No cost, no external process.
#[derive(Debug, Clone, Copy, Default)]
pub struct RegexEvaluator;

#[async_trait]
impl Evaluator for RegexEvaluator {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EventStream, EvaluatorError> {
        let started = Instant::now();
        let rule = &request.task.rule;
        let focus = &request.task.focus_area;
        let pattern = rule
            .violation_regex
            .as_deref()
            .ok_or_else(|| EvaluatorError::NotConfigured(format!("rule '{}' has no violation_regex", rule.name)))?;
        let regex = RegexBuilder::new(pattern)
            .build()
            .map_err(|e| EvaluatorError::NotConfigured(format!("invalid violation_regex: {e}")))?;
        let message = rule
            .violation_message
            .clone()
            .unwrap_or_else(|| format!("Violates {}", rule.name));

        let violations: Vec<_> = focus
            .added_lines()
            .into_iter()
            .filter(|(_, text)| regex.is_match(text))
            .map(|(line, _)| {
                json!({
                    "score": REGEX_VIOLATION_SCORE,
                    "comment": message,
                    "file_path": focus.file_path,
                    "line_number": line,
                })
            })
            .collect();

        let result = EvaluatorResult {
            structured_output: Some(json!({ "violations": violations })),
            cost_usd: Some(0.0),
            duration_ms: started.elapsed().as_millis() as u64,
        };
        Ok(futures::stream::iter([Ok(EvaluatorEvent::Result(result))]).boxed())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluator::map_structured_output;
    use crate::models::task::fixtures;
    use futures::TryStreamExt;

    async fn run(pattern: &str) -> crate::models::RuleResult {
        let mut task = fixtures::task("no-print", "a.py", "h", None);
        task.rule.violation_regex = Some(pattern.into());
        task.rule.violation_message = Some("Use logging".into());
        let request = EvaluationRequest::new(task.clone(), "unused", ".");

        let events: Vec<_> = RegexEvaluator
            .evaluate(&request)
            .await
            .unwrap()
            .try_collect()
            .await
            .unwrap();
        assert_eq!(events.len(), 1);
        let EvaluatorEvent::Result(result) = &events[0] else {
            panic!("expected result event");
        };
        assert_eq!(result.cost_usd, Some(0.0));
        map_structured_output(&task, REGEX_MODEL, result)
    }

    #[tokio::test]
    async fn reports_each_matching_added_line() {
        let result = run(r"print\(|y =").await;
        let lines: Vec<_> = result.violations.iter().map(|v| v.line_number).collect();
        assert_eq!(lines, vec![Some(2), Some(3)]);
        assert!(result.violations.iter().all(|v| v.score == REGEX_VIOLATION_SCORE));
        assert!(result.violations.iter().all(|v| v.comment == "Use logging"));
    }

    #[tokio::test]
    async fn ignores_context_lines() {
        let result = run("keep").await;
        assert!(result.violations.is_empty());
    }

    #[tokio::test]
    async fn missing_regex_is_an_error() {
        let task = fixtures::task("r", "a.py", "h", None);
        let request = EvaluationRequest::new(task, "m", ".");
        assert!(matches!(
            RegexEvaluator.evaluate(&request).await,
            Err(EvaluatorError::NotConfigured(_))
        ));
    }
}
