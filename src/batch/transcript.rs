//! Per-task evaluator transcripts.

use std::fmt::Write as _;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::evaluator::{EvaluationRequest, EvaluatorEvent, EvaluatorResult};

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TranscriptEntry {
    Text { text: String },
    ToolUse { name: String, input: Value },
}

/// What an evaluator said and did while evaluating one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Transcript {
    pub task_id: String,
    pub rule_name: String,
    pub file_path: String,
    pub model: String,
    pub events: Vec<TranscriptEntry>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<EvaluatorResult>,
}

impl Transcript {
    pub fn new(request: &EvaluationRequest) -> Self {
        Self {
            task_id: request.task.task_id.clone(),
            rule_name: request.task.rule.name.clone(),
            file_path: request.task.focus_area.file_path.clone(),
            model: request.model.clone(),
            events: Vec::new(),
            result: None,
        }
    }

    pub fn record(&mut self, event: &EvaluatorEvent) {
        match event {
            EvaluatorEvent::Text { text } => self.events.push(TranscriptEntry::Text { text: text.clone() }),
            EvaluatorEvent::ToolUse { name, input } => self.events.push(TranscriptEntry::ToolUse {
                name: name.clone(),
                input: input.clone(),
            }),
            EvaluatorEvent::Result(result) => self.result = Some(result.clone()),
        }
    }

    /// Whether anything was recorded.
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.result.is_none()
    }

    pub fn to_json(&self) -> String {
        serde_json::to_string_pretty(self).unwrap_or_default()
    }

    pub fn to_markdown(&self) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "# Transcript: {}", self.task_id);
        let _ = writeln!(out);
        let _ = writeln!(out, "- **Rule:** {}", self.rule_name);
        let _ = writeln!(out, "- **File:** {}", self.file_path);
        let _ = writeln!(out, "- **Model:** {}", self.model);

        for entry in &self.events {
            let _ = writeln!(out);
            match entry {
                TranscriptEntry::Text { text } => {
                    let _ = writeln!(out, "{}", text.trim_end());
                }
                TranscriptEntry::ToolUse { name, input } => {
                    let input = serde_json::to_string_pretty(input).unwrap_or_default();
                    let _ = writeln!(out, "**Tool:** `{name}`\n\n```json\n{input}\n```");
                }
            }
        }

        if let Some(result) = &self.result {
            let _ = writeln!(out, "\n## Result\n");
            if let Some(cost) = result.cost_usd {
                let _ = writeln!(out, "- **Cost:** ${cost:.4}");
            }
            let _ = writeln!(out, "- **Duration:** {} ms", result.duration_ms);
            if let Some(output) = &result.structured_output {
                let output = serde_json::to_string_pretty(output).unwrap_or_default();
                let _ = writeln!(out, "\n```json\n{output}\n```");
            }
        }
        out
    }
}
