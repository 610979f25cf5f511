//! Evaluator backed by an external agent process.
//!
//! The prompt is written to the process's stdin. Stdout is read as
//! newline-delimited JSON events:
//!
//! - `{"type":"text","text":...}`
//! - `{"type":"tool_use","name":...,"input":...}`
//! - `{"type":"assistant","message":{"content":[...]}}` (text and tool_use blocks)
//! - `{"type":"result","structured_output":...,"total_cost_usd":...,"duration_ms":...}`
//!
//! Lines that are not JSON are passed through as text.

use std::collections::VecDeque;
use std::path::PathBuf;
use std::process::Stdio;

use async_trait::async_trait;
use futures::StreamExt;
use serde_json::Value;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader, Lines};
use tokio::process::{Child, ChildStdout};
use tokio::task::JoinHandle;

use super::{
    EvaluationRequest, Evaluator, EvaluatorError, EvaluatorEvent, EvaluatorResult, EventStream,
    extract_json_object,
};

/// Placeholder in arguments replaced by the resolved model.
pub const MODEL_PLACEHOLDER: &str = "{model}";

/// Runs a configured agent command once per task.
#[derive(Clone)]
pub struct CommandEvaluator {
    program: String,
    args: Vec<String>,
    api_key: Option<(String, String)>,
}

impl std::fmt::Debug for CommandEvaluator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandEvaluator")
            .field("program", &self.program)
            .field("args", &self.args)
            .field("api_key", &self.api_key.as_ref().map(|(var, _)| format!("{var}=[REDACTED]")))
            .finish()
    }
}

impl CommandEvaluator {
    pub fn new(program: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            program: program.into(),
            args,
            api_key: None,
        }
    }

    /// Pass `key` to the child process as `env_var`.
    pub fn with_api_key(mut self, env_var: impl Into<String>, key: impl Into<String>) -> Self {
        self.api_key = Some((env_var.into(), key.into()));
        self
    }

    /// Arguments with the model placeholder substituted.
    pub fn resolved_args(&self, model: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| arg.replace(MODEL_PLACEHOLDER, model))
            .collect()
    }
}

#[async_trait]
impl Evaluator for CommandEvaluator {
    async fn evaluate(&self, request: &EvaluationRequest) -> Result<EventStream, EvaluatorError> {
        let mut command = tokio::process::Command::new(&self.program);
        command
            .args(self.resolved_args(&request.model))
            .current_dir(&request.repo_root)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        if let Some((var, key)) = &self.api_key {
            command.env(var, key);
        }

        let mut child = command
            .spawn()
            .map_err(|e| EvaluatorError::Spawn(format!("{}: {e}", self.program)))?;
        tracing::debug!(program = %self.program, task_id = %request.task.task_id, "spawned evaluator");

        let stdin = child.stdin.take();
        let prompt = request.prompt();
        // Feed stdin concurrently so a chatty child cannot deadlock on a full pipe.
        tokio::spawn(async move {
            if let Some(mut stdin) = stdin {
                let _ = stdin.write_all(prompt.as_bytes()).await;
                let _ = stdin.shutdown().await;
            }
        });

        let stderr = child.stderr.take().map(|mut pipe| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = pipe.read_to_string(&mut buf).await;
                buf
            })
        });

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| EvaluatorError::Spawn("stdout not captured".to_string()))?;

        let state = ProcessState {
            lines: BufReader::new(stdout).lines(),
            pending: VecDeque::new(),
            child: Some(child),
            stderr,
            program: self.program.clone(),
            repo_root: request.repo_root.clone(),
        };
        Ok(futures::stream::unfold(state, next_event).boxed())
    }
}

struct ProcessState {
    lines: Lines<BufReader<ChildStdout>>,
    pending: VecDeque<EvaluatorEvent>,
    child: Option<Child>,
    stderr: Option<JoinHandle<String>>,
    program: String,
    repo_root: PathBuf,
}

async fn next_event(
    mut state: ProcessState,
) -> Option<(Result<EvaluatorEvent, EvaluatorError>, ProcessState)> {
    loop {
        if let Some(event) = state.pending.pop_front() {
            return Some((Ok(event), state));
        }
        match state.lines.next_line().await {
            Ok(Some(line)) => state.pending.extend(parse_event_line(&line)),
            Ok(None) => {
                let mut child = state.child.take()?;
                let status = child.wait().await;
                let stderr = match state.stderr.take() {
                    Some(handle) => handle.await.unwrap_or_default(),
                    None => String::new(),
                };
                return match status {
                    Ok(status) if status.success() => None,
                    Ok(status) => Some((
                        Err(EvaluatorError::Process {
                            status: status.to_string(),
                            stderr: stderr.trim().to_string(),
                        }),
                        state,
                    )),
                    Err(e) => Some((
                        Err(EvaluatorError::Stream(format!(
                            "waiting for {} in {}: {e}",
                            state.program,
                            state.repo_root.display()
                        ))),
                        state,
                    )),
                };
            }
            Err(e) => {
                state.child = None;
                return Some((Err(EvaluatorError::Stream(e.to_string())), state));
            }
        }
    }
}

/// Decode one stdout line into zero or more events.
pub fn parse_event_line(line: &str) -> Vec<EvaluatorEvent> {
    let trimmed = line.trim();
    if trimmed.is_empty() {
        return Vec::new();
    }
    let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) else {
        return vec![EvaluatorEvent::Text {
            text: line.to_string(),
        }];
    };

    match obj.get("type").and_then(Value::as_str) {
        Some("text") => vec![EvaluatorEvent::Text {
            text: str_field(&obj, "text"),
        }],
        Some("tool_use") => vec![tool_use(&obj)],
        Some("assistant") => obj
            .get("message")
            .and_then(|m| m.get("content"))
            .and_then(Value::as_array)
            .map(|blocks| {
                blocks
                    .iter()
                    .filter_map(Value::as_object)
                    .filter_map(|block| match block.get("type").and_then(Value::as_str) {
                        Some("text") => Some(EvaluatorEvent::Text {
                            text: str_field(block, "text"),
                        }),
                        Some("tool_use") => Some(tool_use(block)),
                        _ => None,
                    })
                    .collect()
            })
            .unwrap_or_default(),
        Some("result") => {
            let structured_output = match obj.get("structured_output") {
                Some(Value::Null) | None => obj
                    .get("result")
                    .and_then(Value::as_str)
                    .and_then(extract_json_object),
                Some(value) => Some(value.clone()),
            };
            let cost_usd = obj
                .get("total_cost_usd")
                .or_else(|| obj.get("cost_usd"))
                .and_then(Value::as_f64);
            let duration_ms = obj.get("duration_ms").and_then(Value::as_u64).unwrap_or(0);
            vec![EvaluatorEvent::Result(EvaluatorResult {
                structured_output,
                cost_usd,
                duration_ms,
            })]
        }
        // System and user echo messages carry nothing for the transcript.
        _ => Vec::new(),
    }
}

fn str_field(obj: &serde_json::Map<String, Value>, key: &str) -> String {
    obj.get(key).and_then(Value::as_str).unwrap_or_default().to_string()
}

fn tool_use(obj: &serde_json::Map<String, Value>) -> EvaluatorEvent {
    EvaluatorEvent::ToolUse {
        name: str_field(obj, "name"),
        input: obj.get("input").cloned().unwrap_or(Value::Null),
    }
}
