//! Evaluator trait and structured-output handling.
//!
//! An evaluator turns one [`EvaluationRequest`] into a stream of events that
//! ends in exactly one [`EvaluatorEvent::Result`]. The batch evaluator
//! forwards intermediate events to observers and maps the final structured
//! output into a [`RuleResult`] with [`map_structured_output`].

pub mod command;
pub mod regex;

use std::path::PathBuf;
use std::sync::LazyLock;

use async_trait::async_trait;
use futures::stream::BoxStream;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::models::{EvaluationTask, RuleResult, Violation};

/// Errors raised while invoking an evaluator.
#[derive(Error, Debug)]
pub enum EvaluatorError {
    #[error("failed to start evaluator: {0}")]
    Spawn(String),

    #[error("evaluator exited with {status}: {stderr}")]
    Process { status: String, stderr: String },

    #[error("evaluator stream failed: {0}")]
    Stream(String),

    #[error("evaluator finished without a result")]
    NoResult,

    #[error("evaluator not configured: {0}")]
    NotConfigured(String),
}

/// Terminal payload of an evaluation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvaluatorResult {
    /// Free-form key/value output; see [`map_structured_output`].
    #[serde(default)]
    pub structured_output: Option<Value>,
    #[serde(default)]
    pub cost_usd: Option<f64>,
    #[serde(default)]
    pub duration_ms: u64,
}

/// One event from an evaluator stream.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EvaluatorEvent {
    Text { text: String },
    ToolUse { name: String, input: Value },
    Result(EvaluatorResult),
}

pub type EventStream = BoxStream<'static, Result<EvaluatorEvent, EvaluatorError>>;

/// Everything an evaluator needs for one task.
#[derive(Debug, Clone)]
pub struct EvaluationRequest {
    pub task: EvaluationTask,
    /// Resolved model: the rule's override or the configured default.
    pub model: String,
    /// Root of the reviewed repository, for agents that explore it.
    pub repo_root: PathBuf,
}

impl EvaluationRequest {
    pub fn new(task: EvaluationTask, default_model: &str, repo_root: impl Into<PathBuf>) -> Self {
        let model = task.model(default_model).to_string();
        Self {
            task,
            model,
            repo_root: repo_root.into(),
        }
    }

    pub fn prompt(&self) -> String {
        build_prompt(&self.task)
    }
}

/// A pluggable rule evaluator.
#[async_trait]
pub trait Evaluator: Send + Sync {
    /// Start evaluating `request`.
    ///
    /// Failing to start is returned directly; failures after that arrive as
    /// stream items.
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EventStream, EvaluatorError>;
}

/// Routes regex rules to `regex` and everything else to `ai`.
pub struct RuleDispatchEvaluator<A> {
    ai: A,
    regex: regex::RegexEvaluator,
}

impl<A: Evaluator> RuleDispatchEvaluator<A> {
    pub fn new(ai: A) -> Self {
        Self {
            ai,
            regex: regex::RegexEvaluator,
        }
    }
}

#[async_trait]
impl<A: Evaluator> Evaluator for RuleDispatchEvaluator<A> {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EventStream, EvaluatorError> {
        if request.task.rule.is_regex_rule() {
            self.regex.evaluate(request).await
        } else {
            self.ai.evaluate(request).await
        }
    }
}

/// Expected shape of an AI evaluator's structured output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct RuleEvaluation {
    /// Whether the code violates the rule.
    pub violates_rule: bool,
    /// Severity score: 1-4 minor, 5-7 moderate, 8-10 severe.
    #[schemars(range(min = 1, max = 10))]
    pub score: u8,
    /// The review comment to post. If the rule includes a "GitHub Comment"
    /// section, use that exact text unless critical context must be added.
    pub comment: String,
    /// Path to the file containing the code.
    #[serde(default)]
    pub file_path: Option<String>,
    /// Specific line number of the violation, if applicable.
    #[serde(default)]
    pub line_number: Option<u32>,
}

static OUTPUT_SCHEMA: LazyLock<String> = LazyLock::new(|| {
    serde_json::to_string_pretty(&schemars::schema_for!(RuleEvaluation)).unwrap_or_default()
});

/// JSON schema of [`RuleEvaluation`].
pub fn output_schema() -> &'static str {
    &OUTPUT_SCHEMA
}

/// Prompt sent to AI evaluators for `task`.
pub fn build_prompt(task: &EvaluationTask) -> String {
    let rule = &task.rule;
    let focus = &task.focus_area;
    format!(
        "You are a code reviewer evaluating whether code violates a specific rule.\n\n\
         ## Rule: {name}\n\n{description}\n\n### Rule Details\n\n{content}\n\n\
         ## Focus Area: {focus_desc}\n\nFile: {file}\nLines: {start}-{end}\n\n\
         Only evaluate the code within the focus area boundaries shown below.\n\n\
         ```diff\n{diff}\n```\n\n\
         ## Instructions\n\n\
         Decide whether the added or changed lines (starting with `+`) violate the rule. \
         Other lines are context only.\n\
         Be precise about the file path and line number of any violation.\n\n\
         Respond with a JSON object matching this schema:\n\n```json\n{schema}\n```\n",
        name = rule.name,
        description = rule.description,
        content = rule.content,
        focus_desc = focus.description,
        file = focus.file_path,
        start = focus.start_line,
        end = focus.end_line,
        diff = focus.focused_content(),
        schema = output_schema(),
    )
}

/// Comment used when the evaluator omits one.
pub const DEFAULT_COMMENT: &str = "evaluation completed";

/// Map an evaluator's structured output into a [`RuleResult`].
///
/// Accepts either a single [`RuleEvaluation`]-shaped object or
/// `{"violations": [...]}`. Missing fields take defaults instead of failing
/// the task: `violates_rule = false`, `score = 1`, the default comment, and
/// the focus area's file and start line. Scores are clamped to 1..=10.
pub fn map_structured_output(task: &EvaluationTask, model: &str, result: &EvaluatorResult) -> RuleResult {
    let violations = match &result.structured_output {
        Some(Value::Object(obj)) => match obj.get("violations") {
            Some(Value::Array(items)) => items
                .iter()
                .filter_map(|item| item.as_object())
                .filter_map(|item| violation_from(task, item, true))
                .collect(),
            _ => violation_from(task, obj, false).into_iter().collect(),
        },
        Some(Value::String(text)) => match extract_json_object(text) {
            Some(value) => {
                let nested = EvaluatorResult {
                    structured_output: Some(value),
                    ..result.clone()
                };
                return map_structured_output(task, model, &nested);
            }
            None => Vec::new(),
        },
        _ => Vec::new(),
    };

    RuleResult {
        task_id: task.task_id.clone(),
        rule_name: task.rule.name.clone(),
        file_path: task.focus_area.file_path.clone(),
        violations,
        model_used: model.to_string(),
        duration_ms: result.duration_ms,
        cost_usd: result.cost_usd,
        documentation_link: task.rule.documentation_link.clone(),
    }
}

/// A violation from one output object, or `None` when it does not violate.
///
/// Entries of a `violations` list count as violating unless they say
/// otherwise.
fn violation_from(
    task: &EvaluationTask,
    obj: &serde_json::Map<String, Value>,
    violates_by_default: bool,
) -> Option<Violation> {
    let violates = obj
        .get("violates_rule")
        .and_then(Value::as_bool)
        .unwrap_or(violates_by_default);
    if !violates {
        return None;
    }

    let score = obj.get("score").and_then(lenient_number).unwrap_or(1.0);
    let comment = obj
        .get("comment")
        .and_then(Value::as_str)
        .filter(|c| !c.trim().is_empty())
        .unwrap_or(DEFAULT_COMMENT);
    let file_path = obj
        .get("file_path")
        .and_then(Value::as_str)
        .filter(|p| !p.is_empty())
        .unwrap_or(task.focus_area.file_path.as_str());
    let line_number = obj
        .get("line_number")
        .and_then(lenient_number)
        .filter(|n| *n >= 1.0)
        .map(|n| n as u32)
        .unwrap_or(task.focus_area.start_line);

    Some(Violation {
        score: score.round().clamp(1.0, 10.0) as u8,
        comment: comment.to_string(),
        file_path: file_path.to_string(),
        line_number: Some(line_number),
    })
}

fn lenient_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// Content inside markdown code fences. The closing fence must start a line.
static FENCE_RE: LazyLock<::regex::Regex> =
    LazyLock::new(|| ::regex::Regex::new(r"(?s)```(?:json)?\s*\n(.*?)\n```").unwrap());

/// Find a JSON object in free text: the raw text, fenced blocks, then the
/// outermost braces.
pub fn extract_json_object(text: &str) -> Option<Value> {
    let mut candidates = vec![text.trim().to_string()];
    for cap in FENCE_RE.captures_iter(text) {
        if let Some(inner) = cap.get(1) {
            candidates.push(inner.as_str().trim().to_string());
        }
    }
    if let (Some(start), Some(end)) = (text.find('{'), text.rfind('}')) {
        if start < end {
            candidates.push(text[start..=end].to_string());
        }
    }
    candidates
        .iter()
        .filter_map(|c| serde_json::from_str::<Value>(c).ok())
        .find(Value::is_object)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::task::fixtures;
    use serde_json::json;

    fn result(output: Value) -> EvaluatorResult {
        EvaluatorResult {
            structured_output: Some(output),
            cost_usd: Some(0.03),
            duration_ms: 900,
        }
    }

    #[test]
    fn maps_single_evaluation() {
        let task = fixtures::task("no-print", "a.py", "h", None);
        let mapped = map_structured_output(
            &task,
            "sonnet",
            &result(json!({
                "violates_rule": true, "score": 7, "comment": "Remove print",
                "file_path": "a.py", "line_number": 2
            })),
        );
        assert_eq!(mapped.task_id, "no-print_a.py");
        assert_eq!(mapped.model_used, "sonnet");
        assert_eq!(mapped.duration_ms, 900);
        assert_eq!(mapped.cost_usd, Some(0.03));
        assert_eq!(
            mapped.violations,
            vec![Violation {
                score: 7,
                comment: "Remove print".into(),
                file_path: "a.py".into(),
                line_number: Some(2),
            }]
        );
    }

    #[test]
    fn missing_fields_take_defaults() {
        let task = fixtures::task("no-print", "a.py", "h", None);
        let mapped = map_structured_output(&task, "m", &result(json!({"violates_rule": true})));
        assert_eq!(
            mapped.violations,
            vec![Violation {
                score: 1,
                comment: DEFAULT_COMMENT.into(),
                file_path: "a.py".into(),
                line_number: Some(1),
            }]
        );

        let clean = map_structured_output(&task, "m", &result(json!({"score": 9})));
        assert!(clean.violations.is_empty());

        let empty = map_structured_output(&task, "m", &EvaluatorResult::default());
        assert!(empty.violations.is_empty());
    }

    #[test]
    fn scores_are_clamped_and_lenient() {
        let task = fixtures::task("r", "a.py", "h", None);
        let high = map_structured_output(&task, "m", &result(json!({"violates_rule": true, "score": 42})));
        assert_eq!(high.violations[0].score, 10);
        let low = map_structured_output(&task, "m", &result(json!({"violates_rule": true, "score": -3})));
        assert_eq!(low.violations[0].score, 1);
        let text = map_structured_output(&task, "m", &result(json!({"violates_rule": true, "score": "6"})));
        assert_eq!(text.violations[0].score, 6);
    }

    #[test]
    fn maps_violation_list() {
        let task = fixtures::task("r", "a.py", "h", None);
        let mapped = map_structured_output(
            &task,
            "m",
            &result(json!({"violations": [
                {"score": 5, "comment": "one", "line_number": 2},
                {"violates_rule": false, "comment": "skip"},
                "garbage",
                {"score": 8, "comment": "two", "file_path": "b.py"}
            ]})),
        );
        let comments: Vec<_> = mapped.violations.iter().map(|v| v.comment.as_str()).collect();
        assert_eq!(comments, vec!["one", "two"]);
        assert_eq!(mapped.violations[1].file_path, "b.py");
        assert_eq!(mapped.violations[1].line_number, Some(1));
    }

    #[test]
    fn maps_json_inside_text_output() {
        let task = fixtures::task("r", "a.py", "h", None);
        let text = "Here you go:\n```json\n{\"violates_rule\": true, \"score\": 4, \"comment\": \"x\"}\n```";
        let mapped = map_structured_output(&task, "m", &result(Value::String(text.into())));
        assert_eq!(mapped.violations.len(), 1);
        assert_eq!(mapped.violations[0].score, 4);
    }

    #[test]
    fn extract_json_object_candidates() {
        assert_eq!(extract_json_object("{\"a\": 1}"), Some(json!({"a": 1})));
        assert_eq!(
            extract_json_object("prefix {\"a\": {\"b\": 2}} suffix"),
            Some(json!({"a": {"b": 2}}))
        );
        assert_eq!(extract_json_object("no json here"), None);
        assert_eq!(extract_json_object("[1, 2]"), None);
    }

    #[test]
    fn prompt_contains_rule_focus_and_schema() {
        let task = fixtures::task("no-print", "src/a.py", "h", None);
        let prompt = build_prompt(&task);
        assert!(prompt.contains("## Rule: no-print"));
        assert!(prompt.contains("Do not violate no-print."));
        assert!(prompt.contains("File: src/a.py"));
        assert!(prompt.contains("Lines: 1-3"));
        assert!(prompt.contains("+print(x)"));
        assert!(prompt.contains("violates_rule"));
    }

    #[test]
    fn schema_declares_required_fields() {
        let schema: Value = serde_json::from_str(output_schema()).unwrap();
        let required: Vec<_> = schema["required"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(Value::as_str)
            .collect();
        assert!(required.contains(&"violates_rule"));
        assert!(required.contains(&"score"));
        assert!(required.contains(&"comment"));
    }

    #[test]
    fn request_resolves_model() {
        let mut task = fixtures::task("r", "a.py", "h", None);
        let request = EvaluationRequest::new(task.clone(), "default", "/repo");
        assert_eq!(request.model, "default");
        task.rule.model = Some("opus".into());
        assert_eq!(EvaluationRequest::new(task, "default", "/repo").model, "opus");
    }

    #[test]
    fn events_decode_from_tagged_json() {
        let event: EvaluatorEvent = serde_json::from_str(r#"{"type":"text","text":"hi"}"#).unwrap();
        assert_eq!(event, EvaluatorEvent::Text { text: "hi".into() });
        let event: EvaluatorEvent =
            serde_json::from_str(r#"{"type":"result","structured_output":{"violates_rule":false},"duration_ms":5}"#)
                .unwrap();
        assert!(matches!(event, EvaluatorEvent::Result(r) if r.duration_ms == 5));
    }
}
