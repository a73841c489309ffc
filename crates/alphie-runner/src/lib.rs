//! The `AgentRunner` capability (§4.2): "run a language-model agent in a
//! working directory with a tool belt, and stream back structured events."
//!
//! Three variants exist — [`SubprocessRunner`] (wraps an external CLI
//! binary), [`ApiRunner`] (drives an HTTP API plus a local tool executor),
//! and [`FixtureRunner`] (test-only, emits a scripted event sequence) — but
//! the engine only ever sees [`AgentRunner`], a single enum-dispatched type.
//! Nothing upstream branches on which variant is live.

mod api;
mod fixture;
mod subprocess;
mod tokens;

pub use api::ApiRunner;
pub use fixture::FixtureRunner;
pub use subprocess::SubprocessRunner;
pub use tokens::{TokenTracker, UsageSnapshot};

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Options controlling one agent run.
#[derive(Clone, Debug)]
pub struct RunnerOptions {
    /// Model name, e.g. `"claude-sonnet"`.
    pub model: String,
    /// Working directory the agent's tool belt is scoped to.
    pub workdir: PathBuf,
    /// Overall wall-clock budget for the run.
    pub timeout: Duration,
}

/// One event in an agent's output stream (§4.2).
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StreamEvent {
    /// What kind of event this is.
    pub kind: EventKind,
    /// Free text payload (assistant message chunk, tool output, error text).
    #[serde(default)]
    pub text: Option<String>,
    /// The tool invoked, when `kind` is `ToolUse` or `ToolResult`.
    #[serde(default)]
    pub tool_name: Option<String>,
    /// Token usage reported alongside this event, if any.
    #[serde(default)]
    pub raw_usage: Option<RawUsage>,
}

/// The kind of a [`StreamEvent`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// A system/setup message, not attributable to the model.
    System,
    /// A chunk of the assistant's reply.
    Assistant,
    /// The assistant invoked a tool.
    ToolUse,
    /// A tool finished and reported its result.
    ToolResult,
    /// The run's final result.
    Result,
    /// A terminal error.
    Error,
}

/// Token counts reported by one [`StreamEvent`].
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawUsage {
    /// Input tokens consumed.
    pub input_tokens: u64,
    /// Output tokens produced.
    pub output_tokens: u64,
}

/// Error returned by an `AgentRunner` operation.
#[derive(Debug, Error)]
pub enum RunnerError {
    /// `start` was called twice on the same runner.
    #[error("agent runner already started")]
    AlreadyStarted,
    /// `events`/`wait`/`kill` was called before `start`.
    #[error("agent runner not started")]
    NotStarted,
    /// The run exceeded its configured timeout and was killed.
    #[error("agent run timed out after {0:?}")]
    Timeout(Duration),
    /// The underlying process or HTTP call failed.
    #[error("agent runner I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The agent's output could not be parsed as a stream event.
    #[error("agent runner decode error: {0}")]
    Json(#[from] serde_json::Error),
    /// The in-process API variant's HTTP call failed.
    #[error("agent runner HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

/// "Run a prompt against a working directory and stream back structured
/// events" (§4.2), realized as one enum so callers never match on variant.
pub enum AgentRunner {
    /// Wraps an external CLI binary (the `--cli` flag path, §6).
    Subprocess(SubprocessRunner),
    /// Drives an HTTP API plus a local Read/Write/Edit/Bash/Glob/Grep tool
    /// executor scoped to the workdir.
    Api(ApiRunner),
    /// Test-only: replays a scripted `StreamEvent` sequence.
    Fixture(FixtureRunner),
}

impl AgentRunner {
    /// Start the agent. Double-start fails with [`RunnerError::AlreadyStarted`].
    pub fn start(&mut self, prompt: &str, options: RunnerOptions) -> Result<(), RunnerError> {
        match self {
            Self::Subprocess(r) => r.start(prompt, options),
            Self::Api(r) => r.start(prompt, options),
            Self::Fixture(r) => r.start(prompt, options),
        }
    }

    /// Drain the finite stream of events produced by this run.
    ///
    /// # Errors
    /// Returns [`RunnerError::NotStarted`] if called before `start`.
    pub fn events(&mut self) -> Result<Vec<StreamEvent>, RunnerError> {
        match self {
            Self::Subprocess(r) => r.events(),
            Self::Api(r) => r.events(),
            Self::Fixture(r) => r.events(),
        }
    }

    /// Block until the run terminates; report the terminal error, if any.
    pub fn wait(&mut self) -> Result<(), RunnerError> {
        match self {
            Self::Subprocess(r) => r.wait(),
            Self::Api(r) => r.wait(),
            Self::Fixture(r) => r.wait(),
        }
    }

    /// Cooperative, idempotent cancellation.
    pub fn kill(&mut self) {
        match self {
            Self::Subprocess(r) => r.kill(),
            Self::Api(r) => r.kill(),
            Self::Fixture(r) => r.kill(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixture_runner_replays_scripted_events() {
        let scripted = vec![
            StreamEvent {
                kind: EventKind::Assistant,
                text: Some("working on it".to_owned()),
                tool_name: None,
                raw_usage: None,
            },
            StreamEvent {
                kind: EventKind::Result,
                text: Some("done".to_owned()),
                tool_name: None,
                raw_usage: Some(RawUsage {
                    input_tokens: 100,
                    output_tokens: 50,
                }),
            },
        ];
        let mut runner = AgentRunner::Fixture(FixtureRunner::new(scripted.clone()));
        runner
            .start(
                "do the thing",
                RunnerOptions {
                    model: "claude-sonnet".to_owned(),
                    workdir: PathBuf::from("/tmp"),
                    timeout: Duration::from_secs(60),
                },
            )
            .unwrap();
        let events = runner.events().unwrap();
        assert_eq!(events, scripted);
        runner.wait().unwrap();
    }

    #[test]
    fn double_start_fails() {
        let mut runner = AgentRunner::Fixture(FixtureRunner::new(Vec::new()));
        let opts = RunnerOptions {
            model: "claude-sonnet".to_owned(),
            workdir: PathBuf::from("/tmp"),
            timeout: Duration::from_secs(60),
        };
        runner.start("x", opts.clone()).unwrap();
        let err = runner.start("x", opts).unwrap_err();
        assert!(matches!(err, RunnerError::AlreadyStarted));
    }
}
