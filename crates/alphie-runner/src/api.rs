//! The in-process `AgentRunner` variant: drives an HTTP API directly and
//! executes tool calls locally, scoped to the workdir.

use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{EventKind, RawUsage, RunnerError, RunnerOptions, StreamEvent};

const MAX_TOOL_ROUNDS: u32 = 25;

/// Drives the language-model HTTP API and a local tool executor exposing
/// Read/Write/Edit/Bash/Glob/Grep, scoped to the run's working directory.
pub struct ApiRunner {
    client: reqwest::blocking::Client,
    api_key: String,
    endpoint: String,
    workdir: PathBuf,
    events: Vec<StreamEvent>,
    started: bool,
    killed: bool,
    terminal_error: Option<String>,
}

impl ApiRunner {
    /// Build a runner that authenticates with `api_key` against `endpoint`
    /// (the Anthropic Messages API, or a Bedrock-fronted equivalent).
    #[must_use]
    pub fn new(api_key: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::blocking::Client::new(),
            api_key: api_key.into(),
            endpoint: endpoint.into(),
            workdir: PathBuf::new(),
            events: Vec::new(),
            started: false,
            killed: false,
            terminal_error: None,
        }
    }

    pub(crate) fn start(&mut self, prompt: &str, options: RunnerOptions) -> Result<(), RunnerError> {
        if self.started {
            return Err(RunnerError::AlreadyStarted);
        }
        self.started = true;
        self.workdir = options.workdir.clone();

        let mut messages = vec![ApiMessage {
            role: "user".to_owned(),
            content: prompt.to_owned(),
        }];

        for _round in 0..MAX_TOOL_ROUNDS {
            if self.killed {
                break;
            }
            let reply = match self.call_model(&options.model, &messages) {
                Ok(r) => r,
                Err(e) => {
                    self.terminal_error = Some(e.to_string());
                    self.events.push(StreamEvent {
                        kind: EventKind::Error,
                        text: Some(e.to_string()),
                        tool_name: None,
                        raw_usage: None,
                    });
                    return Ok(());
                }
            };

            self.events.push(StreamEvent {
                kind: EventKind::Assistant,
                text: Some(reply.text.clone()),
                tool_name: None,
                raw_usage: Some(reply.usage),
            });

            let Some(tool_call) = reply.tool_call else {
                self.events.push(StreamEvent {
                    kind: EventKind::Result,
                    text: Some(reply.text),
                    tool_name: None,
                    raw_usage: Some(reply.usage),
                });
                return Ok(());
            };

            self.events.push(StreamEvent {
                kind: EventKind::ToolUse,
                text: Some(tool_call.input.clone()),
                tool_name: Some(tool_call.name.clone()),
                raw_usage: None,
            });

            let result = execute_tool(&self.workdir, &tool_call);
            self.events.push(StreamEvent {
                kind: EventKind::ToolResult,
                text: Some(result.clone()),
                tool_name: Some(tool_call.name),
                raw_usage: None,
            });

            messages.push(ApiMessage {
                role: "assistant".to_owned(),
                content: reply.text,
            });
            messages.push(ApiMessage {
                role: "user".to_owned(),
                content: result,
            });
        }

        self.terminal_error = Some("max tool rounds exceeded".to_owned());
        Ok(())
    }

    fn call_model(&self, model: &str, messages: &[ApiMessage]) -> Result<ModelReply, RunnerError> {
        let request = ApiRequest {
            model: model.to_owned(),
            messages: messages.to_vec(),
        };
        let response = self
            .client
            .post(&self.endpoint)
            .header("x-api-key", &self.api_key)
            .header("content-type", "application/json")
            .timeout(Duration::from_secs(120))
            .json(&request)
            .send()?
            .error_for_status()?;
        let body: ApiResponse = response.json()?;
        Ok(ModelReply {
            text: body.text,
            tool_call: body.tool_call,
            usage: body.usage,
        })
    }

    pub(crate) fn events(&mut self) -> Result<Vec<StreamEvent>, RunnerError> {
        if !self.started {
            return Err(RunnerError::NotStarted);
        }
        Ok(std::mem::take(&mut self.events))
    }

    pub(crate) fn wait(&mut self) -> Result<(), RunnerError> {
        if !self.started {
            return Err(RunnerError::NotStarted);
        }
        if let Some(msg) = &self.terminal_error {
            return Err(RunnerError::Io(std::io::Error::other(msg.clone())));
        }
        Ok(())
    }

    pub(crate) fn kill(&mut self) {
        self.killed = true;
    }
}

#[derive(Clone, Serialize)]
struct ApiMessage {
    role: String,
    content: String,
}

#[derive(Serialize)]
struct ApiRequest {
    model: String,
    messages: Vec<ApiMessage>,
}

#[derive(Deserialize)]
struct ApiResponse {
    text: String,
    #[serde(default)]
    tool_call: Option<ToolCall>,
    #[serde(default)]
    usage: RawUsage,
}

#[derive(Clone, Deserialize)]
struct ToolCall {
    name: String,
    input: String,
}

struct ModelReply {
    text: String,
    tool_call: Option<ToolCall>,
    usage: RawUsage,
}

/// Execute one tool call against `workdir`. `tool_call.input` is a
/// newline-separated `key=value` argument list (e.g. `path=src/main.rs`),
/// kept deliberately simple since the wire format of the real API is out of
/// scope (§1 Non-goals).
fn execute_tool(workdir: &Path, tool_call: &ToolCall) -> String {
    let args = parse_tool_args(&tool_call.input);
    match tool_call.name.as_str() {
        "Read" => args
            .get("path")
            .map(|p| std::fs::read_to_string(workdir.join(p)))
            .map_or_else(
                || "error: missing path argument".to_owned(),
                |r| r.unwrap_or_else(|e| format!("error: {e}")),
            ),
        "Write" => {
            let (Some(path), Some(content)) = (args.get("path"), args.get("content")) else {
                return "error: missing path or content argument".to_owned();
            };
            std::fs::write(workdir.join(path), content)
                .map_or_else(|e| format!("error: {e}"), |()| "ok".to_owned())
        }
        "Bash" => {
            let Some(command) = args.get("command") else {
                return "error: missing command argument".to_owned();
            };
            match Command::new("sh").arg("-c").arg(command).current_dir(workdir).output() {
                Ok(out) => {
                    let mut combined = String::from_utf8_lossy(&out.stdout).into_owned();
                    combined.push_str(&String::from_utf8_lossy(&out.stderr));
                    combined
                }
                Err(e) => format!("error: {e}"),
            }
        }
        "Glob" | "Grep" | "Edit" => {
            format!("error: {} not implemented in this runner", tool_call.name)
        }
        other => format!("error: unknown tool {other}"),
    }
}

fn parse_tool_args(input: &str) -> std::collections::HashMap<String, String> {
    input
        .lines()
        .filter_map(|line| line.split_once('='))
        .map(|(k, v)| (k.trim().to_owned(), v.trim().to_owned()))
        .collect()
}
