//! The Multi-Layer Task Validator (C7, §4.7): contract, build/test,
//! semantic, and acceptance layers, run in order with first-failure
//! short-circuit.

mod baseline;
mod ecosystem;

pub use baseline::Baseline;

use std::path::Path;
use std::process::Command;
use std::time::Duration;

use alphie_runner::{AgentRunner, EventKind, RunnerOptions, StreamEvent};

use crate::error::EngineError;
use crate::model::task::{Task, TaskId};

const DEFAULT_COMMAND_TIMEOUT: Duration = Duration::from_secs(300);

/// The layer that produced a [`ValidationOutcome`] (§4.7).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Layer {
    /// `verification_intent` commands.
    Contract,
    /// Ecosystem build/test commands, baseline-gated.
    BuildTest,
    /// An agent reviewing the diff against the task description.
    Semantic,
    /// An agent reviewing the diff against acceptance criteria.
    Acceptance,
}

impl Layer {
    /// The static name used in `EngineError::ValidationFailed.layer`.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Contract => "contract",
            Self::BuildTest => "build_test",
            Self::Semantic => "semantic",
            Self::Acceptance => "acceptance",
        }
    }
}

/// The result of running one (or all) validator layers.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ValidationOutcome {
    /// `true` if every layer passed.
    pub passed: bool,
    /// Which layer failed, when `passed` is `false`.
    pub failed_layer: Option<Layer>,
    /// Diagnostic text fed back to the Executor as a critique (§4.7).
    pub critique: Option<String>,
}

impl ValidationOutcome {
    fn pass() -> Self {
        Self {
            passed: true,
            failed_layer: None,
            critique: None,
        }
    }

    fn fail(layer: Layer, critique: impl Into<String>) -> Self {
        Self {
            passed: false,
            failed_layer: Some(layer),
            critique: Some(critique.into()),
        }
    }
}

/// Run one shell command in `workdir`, capturing combined output and
/// treating a timeout the same shape the Task Executor's critique loop
/// expects: exit code 0 is a pass, anything else (including timeout) is a
/// failure with its output as the diagnostic.
fn run_command(workdir: &Path, command: &str, timeout: Duration) -> (bool, String) {
    let (tx, rx) = std::sync::mpsc::channel();
    let workdir = workdir.to_owned();
    let command_owned = command.to_owned();
    std::thread::spawn(move || {
        let output = Command::new("sh")
            .arg("-c")
            .arg(&command_owned)
            .current_dir(&workdir)
            .output();
        let _ = tx.send(output);
    });

    match rx.recv_timeout(timeout) {
        Ok(Ok(output)) => {
            let mut text = String::from_utf8_lossy(&output.stdout).into_owned();
            text.push_str(&String::from_utf8_lossy(&output.stderr));
            (output.status.success(), text)
        }
        Ok(Err(err)) => (false, format!("failed to run '{command}': {err}")),
        Err(_) => (false, format!("command '{command}' timed out after {timeout:?}")),
    }
}

/// Layer 1: run every `verification_intent` command in the worktree (§4.7).
#[must_use]
pub fn contract_layer(task: &Task, workdir: &Path, timeout: Duration) -> ValidationOutcome {
    for command in &task.verification_intent {
        let (ok, output) = run_command(workdir, command, timeout);
        if !ok {
            return ValidationOutcome::fail(
                Layer::Contract,
                format!("verification command '{command}' failed:\n{output}"),
            );
        }
    }
    ValidationOutcome::pass()
}

/// Layer 2: auto-detect the ecosystem and run its build/test commands,
/// tolerating only pre-existing (baseline) failures (§4.7).
#[must_use]
pub fn build_test_layer(
    workdir: &Path,
    gates: &crate::config::QualityGatesConfig,
    baseline: &Baseline,
    timeout: Duration,
) -> ValidationOutcome {
    let Some(eco) = ecosystem::detect(workdir) else {
        return ValidationOutcome::pass();
    };

    if gates.build {
        let (ok, output) = run_command(workdir, eco.build_command, timeout);
        if !ok {
            return ValidationOutcome::fail(Layer::BuildTest, format!("build failed:\n{output}"));
        }
    }
    if gates.typecheck {
        if let Some(cmd) = eco.typecheck_command {
            let (ok, output) = run_command(workdir, cmd, timeout);
            if !ok {
                return ValidationOutcome::fail(Layer::BuildTest, format!("typecheck failed:\n{output}"));
            }
        }
    }
    if gates.lint {
        if let Some(cmd) = eco.lint_command {
            let (ok, output) = run_command(workdir, cmd, timeout);
            if !ok {
                return ValidationOutcome::fail(Layer::BuildTest, format!("lint failed:\n{output}"));
            }
        }
    }
    if gates.test {
        let (_ok, output) = run_command(workdir, eco.test_command, timeout);
        let failing_now = baseline::parse_failing_tests(&output);
        let new_failures: Vec<&String> = failing_now.difference(baseline.failing_tests()).collect();
        if !new_failures.is_empty() {
            return ValidationOutcome::fail(
                Layer::BuildTest,
                format!(
                    "{} new or worsened test failure(s): {}\n{output}",
                    new_failures.len(),
                    new_failures
                        .iter()
                        .map(std::string::ToString::to_string)
                        .collect::<Vec<_>>()
                        .join(", ")
                ),
            );
        }
    }
    ValidationOutcome::pass()
}

fn review_prompt(header: &str, payload: &str, diff: &str) -> String {
    format!(
        "{header}\n\n{payload}\n\nUnified diff:\n{diff}\n\nRespond with a first line of either \
         APPROVED or NOT APPROVED, followed by your reasoning."
    )
}

fn parse_review(layer: Layer, text: &str) -> ValidationOutcome {
    let Some(first_line) = text.lines().find(|l| !l.trim().is_empty()) else {
        return ValidationOutcome::fail(layer, "reviewer produced no output");
    };
    if first_line.contains("APPROVED") && !first_line.contains("NOT APPROVED") {
        ValidationOutcome::pass()
    } else {
        ValidationOutcome::fail(layer, text.to_owned())
    }
}

fn drive_reviewer(
    runner: &mut AgentRunner,
    prompt: &str,
    options: RunnerOptions,
    task_id: &TaskId,
) -> Result<String, EngineError> {
    runner.start(prompt, options).map_err(|e| EngineError::AgentFailed {
        task: task_id.clone(),
        detail: e.to_string(),
    })?;
    let events = runner.events().map_err(|e| EngineError::AgentFailed {
        task: task_id.clone(),
        detail: e.to_string(),
    })?;
    runner.wait().map_err(|e| EngineError::AgentFailed {
        task: task_id.clone(),
        detail: e.to_string(),
    })?;
    Ok(final_result_text(&events).unwrap_or_default())
}

fn final_result_text(events: &[StreamEvent]) -> Option<String> {
    events
        .iter()
        .rev()
        .find(|e| e.kind == EventKind::Result)
        .or_else(|| events.iter().rev().find(|e| e.kind == EventKind::Assistant))
        .and_then(|e| e.text.clone())
}

/// Layer 3: an agent reviews the diff against the task description (§4.7).
///
/// # Errors
/// Returns `EngineError::AgentFailed` if the reviewer agent cannot be run.
pub fn semantic_layer(
    runner: &mut AgentRunner,
    task: &Task,
    diff: &str,
    options: RunnerOptions,
) -> Result<ValidationOutcome, EngineError> {
    let prompt = review_prompt("Review this change against its task description.", &task.description, diff);
    let text = drive_reviewer(runner, &prompt, options, &task.id)?;
    Ok(parse_review(Layer::Semantic, &text))
}

/// Layer 4: an agent reviews the diff against acceptance criteria (§4.7).
///
/// # Errors
/// Returns `EngineError::AgentFailed` if the reviewer agent cannot be run.
pub fn acceptance_layer(
    runner: &mut AgentRunner,
    task: &Task,
    diff: &str,
    options: RunnerOptions,
) -> Result<ValidationOutcome, EngineError> {
    let prompt = review_prompt(
        "Review this change against its acceptance criteria.",
        &task.acceptance_criteria,
        diff,
    );
    let text = drive_reviewer(runner, &prompt, options, &task.id)?;
    Ok(parse_review(Layer::Acceptance, &text))
}

/// Run all four layers in order, short-circuiting at the first failure
/// (§4.7). `reviewer_factory` builds a fresh `AgentRunner` per review layer
/// so each gets its own process/session.
///
/// # Errors
/// Returns `EngineError::AgentFailed` if a reviewer agent cannot be run.
pub fn validate(
    task: &Task,
    workdir: &Path,
    diff: &str,
    gates: &crate::config::QualityGatesConfig,
    baseline: &Baseline,
    command_timeout: Duration,
    mut reviewer_factory: impl FnMut() -> AgentRunner,
    review_options: RunnerOptions,
) -> Result<ValidationOutcome, EngineError> {
    let contract = contract_layer(task, workdir, command_timeout);
    if !contract.passed {
        return Ok(contract);
    }

    let build_test = build_test_layer(workdir, gates, baseline, command_timeout);
    if !build_test.passed {
        return Ok(build_test);
    }

    let mut semantic_runner = reviewer_factory();
    let semantic = semantic_layer(&mut semantic_runner, task, diff, review_options.clone())?;
    if !semantic.passed {
        return Ok(semantic);
    }

    let mut acceptance_runner = reviewer_factory();
    acceptance_layer(&mut acceptance_runner, task, diff, review_options)
}

impl Default for ValidationOutcome {
    fn default() -> Self {
        Self::pass()
    }
}

/// The contract layer's default per-command timeout (§4.7), exposed so the
/// Executor can use it when the config doesn't override it.
#[must_use]
pub const fn default_command_timeout() -> Duration {
    DEFAULT_COMMAND_TIMEOUT
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QualityGatesConfig;
    use crate::model::task::TaskType;
    use alphie_runner::FixtureRunner;

    fn opts(workdir: &Path) -> RunnerOptions {
        RunnerOptions {
            model: "claude-sonnet".to_owned(),
            workdir: workdir.to_owned(),
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn contract_layer_passes_when_all_commands_succeed() {
        let mut task = Task::new("t", TaskType::Feature);
        task.verification_intent = vec!["true".to_owned()];
        let outcome = contract_layer(&task, Path::new("/tmp"), Duration::from_secs(5));
        assert!(outcome.passed);
    }

    #[test]
    fn contract_layer_fails_on_nonzero_exit() {
        let mut task = Task::new("t", TaskType::Feature);
        task.verification_intent = vec!["false".to_owned()];
        let outcome = contract_layer(&task, Path::new("/tmp"), Duration::from_secs(5));
        assert!(!outcome.passed);
        assert_eq!(outcome.failed_layer, Some(Layer::Contract));
    }

    #[test]
    fn semantic_layer_parses_approved() {
        let task = Task::new("t", TaskType::Feature);
        let script = vec![StreamEvent {
            kind: EventKind::Result,
            text: Some("APPROVED\nlooks good".to_owned()),
            tool_name: None,
            raw_usage: None,
        }];
        let mut runner = AgentRunner::Fixture(FixtureRunner::new(script));
        let dir = tempfile::tempdir().unwrap();
        let outcome = semantic_layer(&mut runner, &task, "diff", opts(dir.path())).unwrap();
        assert!(outcome.passed);
    }

    #[test]
    fn semantic_layer_parses_not_approved() {
        let task = Task::new("t", TaskType::Feature);
        let script = vec![StreamEvent {
            kind: EventKind::Result,
            text: Some("NOT APPROVED\nmissing error handling".to_owned()),
            tool_name: None,
            raw_usage: None,
        }];
        let mut runner = AgentRunner::Fixture(FixtureRunner::new(script));
        let dir = tempfile::tempdir().unwrap();
        let outcome = semantic_layer(&mut runner, &task, "diff", opts(dir.path())).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.failed_layer, Some(Layer::Semantic));
    }

    #[test]
    fn acceptance_layer_failure_is_labeled_acceptance_not_semantic() {
        let task = Task::new("t", TaskType::Feature);
        let script = vec![StreamEvent {
            kind: EventKind::Result,
            text: Some("NOT APPROVED\nmissing acceptance criterion".to_owned()),
            tool_name: None,
            raw_usage: None,
        }];
        let mut runner = AgentRunner::Fixture(FixtureRunner::new(script));
        let dir = tempfile::tempdir().unwrap();
        let outcome = acceptance_layer(&mut runner, &task, "diff", opts(dir.path())).unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.failed_layer, Some(Layer::Acceptance));
    }

    #[test]
    fn validate_short_circuits_on_contract_failure() {
        let mut task = Task::new("t", TaskType::Feature);
        task.verification_intent = vec!["false".to_owned()];
        let dir = tempfile::tempdir().unwrap();
        let gates = QualityGatesConfig::default();
        let baseline = Baseline::empty();
        let outcome = validate(
            &task,
            dir.path(),
            "diff",
            &gates,
            &baseline,
            Duration::from_secs(5),
            || AgentRunner::Fixture(FixtureRunner::new(Vec::new())),
            opts(dir.path()),
        )
        .unwrap();
        assert!(!outcome.passed);
        assert_eq!(outcome.failed_layer, Some(Layer::Contract));
    }
}
