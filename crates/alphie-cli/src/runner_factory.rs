//! Build an `AgentRunner` factory closure from resolved config (§6): the
//! `--cli` flag selects the subprocess backend, otherwise the API backend
//! is used per `anthropic.backend`.

use std::path::PathBuf;
use std::time::Duration;

use alphie_engine::config::{AnthropicBackend, EngineConfig};
use alphie_runner::{AgentRunner, ApiRunner, RunnerOptions, SubprocessRunner};
use anyhow::{Context, Result};

/// Everything a runner factory closure needs to capture by value.
#[derive(Clone)]
pub struct RunnerSpec {
    cli_binary: Option<String>,
    api_key: String,
    endpoint: String,
}

/// Resolve which backend to build runners against.
///
/// # Errors
/// Returns an error if the API backend is selected but no API key is
/// configured (neither `ANTHROPIC_API_KEY` nor `anthropic.api_key`).
pub fn resolve(config: &EngineConfig, cli_binary: Option<String>) -> Result<RunnerSpec> {
    if let Some(binary) = cli_binary {
        return Ok(RunnerSpec { cli_binary: Some(binary), api_key: String::new(), endpoint: String::new() });
    }
    let api_key = std::env::var("ANTHROPIC_API_KEY")
        .ok()
        .or_else(|| config.anthropic.api_key.clone())
        .context("no Anthropic API key: set ANTHROPIC_API_KEY or anthropic.api_key, or pass --cli")?;
    let endpoint = match config.anthropic.backend {
        AnthropicBackend::Api => "https://api.anthropic.com/v1/messages".to_owned(),
        AnthropicBackend::Bedrock => "https://bedrock-runtime.amazonaws.com".to_owned(),
    };
    Ok(RunnerSpec { cli_binary: None, api_key, endpoint })
}

impl RunnerSpec {
    /// Build one fresh `AgentRunner` per call, matching the selected backend.
    #[must_use]
    pub fn make(&self) -> AgentRunner {
        match &self.cli_binary {
            Some(binary) => AgentRunner::Subprocess(SubprocessRunner::new(binary.clone())),
            None => AgentRunner::Api(ApiRunner::new(self.api_key.clone(), self.endpoint.clone())),
        }
    }
}

/// Build `RunnerOptions` for a tier/workdir/timeout combination.
#[must_use]
pub fn runner_options(model: &str, workdir: PathBuf, timeout: Duration) -> RunnerOptions {
    RunnerOptions { model: model.to_owned(), workdir, timeout }
}
