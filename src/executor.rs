//! The Task Executor (C6, §4.6): drives one Task through completion within
//! its worktree via the "work → critique → improve" loop.

use std::time::Duration;

use alphie_runner::{AgentRunner, EventKind, RunnerOptions, StreamEvent, TokenTracker};
use alphie_vcs::Vcs;

use crate::config::QualityGatesConfig;
use crate::error::EngineError;
use crate::eventbus::{EscalationResponse, EventBus, Question};
use crate::model::agent::{Agent, AgentLifecycle};
use crate::model::event::{Event, EventType};
use crate::model::task::Task;
use crate::model::worktree::Worktree;
use crate::validator::{self, Baseline};

/// What an escalation consumer decided after `max_attempts` was exhausted
/// (§4.6 step 5).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EscalationDecision {
    /// Grant one more attempt.
    Retry,
    /// Give up on this task; leave it `blocked`.
    Skip,
    /// A human will finish this task by hand; leave it `blocked`.
    Manual,
    /// Abort the whole session.
    Abort,
}

impl EscalationDecision {
    fn parse(action: &str) -> Option<Self> {
        match action {
            "retry" => Some(Self::Retry),
            "skip" => Some(Self::Skip),
            "manual" => Some(Self::Manual),
            "abort" => Some(Self::Abort),
            _ => None,
        }
    }
}

/// The outcome of driving a task to completion, failure, or a blocked state
/// (§4.6 `Execute` contract).
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ExecutionResult {
    /// Whether the task reached a committed, validated state.
    pub success: bool,
    /// Unified diff of the final committed attempt against the base ref.
    pub diff: String,
    /// Paths touched by the final committed attempt.
    pub changed_files: Vec<String>,
    /// Cumulative input tokens across every attempt.
    pub input_tokens: u64,
    /// Cumulative output tokens across every attempt.
    pub output_tokens: u64,
    /// Cumulative estimated cost in USD.
    pub cost_usd: f64,
    /// Number of Executor attempts made.
    pub attempts: u32,
    /// Set when `success` is `false`: why execution stopped.
    pub terminal_error: Option<String>,
}

/// Per-call tuning for [`execute`], pulled from the resolved `EngineConfig`
/// and the task's tier (§4.6, §4.9).
#[derive(Clone, Debug)]
pub struct ExecutorOptions {
    /// Maximum critique-loop attempts before escalating (tier-configured,
    /// default 3).
    pub max_attempts: u32,
    /// Model/workdir/timeout passed to each `AgentRunner::start`.
    pub runner_options: RunnerOptions,
    /// Which build/test gates are enabled.
    pub quality_gates: QualityGatesConfig,
    /// Timeout for each contract/build/test command.
    pub command_timeout: Duration,
}

fn compose_prompt(task: &Task, prior_critique: Option<&str>) -> String {
    let mut prompt = format!(
        "Task: {}\n\nDescription:\n{}\n\nFile boundaries: {}\n\nAcceptance criteria:\n{}\n\nVerification commands:\n{}\n",
        task.title,
        task.description,
        task.file_boundaries.join(", "),
        task.acceptance_criteria,
        task.verification_intent.join("\n"),
    );
    if let Some(critique) = prior_critique {
        prompt.push_str("\nYour previous attempt failed validation. Critique:\n");
        prompt.push_str(critique);
        prompt.push_str("\nRevise your previous work to address this critique.\n");
    }
    prompt
}

/// Drive `task` to completion within `worktree`, on `agent`'s branch,
/// parented at `base_ref` (§4.6).
///
/// `make_runner` mints a fresh `AgentRunner` per attempt and per review
/// layer, so each gets an independent process/session.
///
/// # Errors
/// Returns `EngineError::AgentFailed` if the `AgentRunner` cannot be driven,
/// or any `alphie_vcs::VcsError`-derived error if staging/committing/diffing
/// fails.
#[allow(clippy::too_many_arguments)]
pub fn execute(
    vcs: &impl Vcs,
    bus: &EventBus,
    task: &mut Task,
    agent: &mut Agent,
    worktree: &Worktree,
    base_ref: &str,
    baseline: &Baseline,
    options: &ExecutorOptions,
    mut make_runner: impl FnMut() -> AgentRunner,
) -> Result<ExecutionResult, EngineError> {
    bus.publish(
        Event::new(EventType::TaskStarted, 0, format!("starting task '{}'", task.title))
            .with_task(task.id.clone())
            .with_agent(agent.id.clone()),
    );
    agent.lifecycle = AgentLifecycle::Running;

    let mut result = ExecutionResult::default();
    let mut critique: Option<String> = None;
    let tracker = TokenTracker::new(options.runner_options.model.clone());

    loop {
        task.attempt_count += 1;
        result.attempts = task.attempt_count;

        let prompt = compose_prompt(task, critique.as_deref());
        let mut runner = make_runner();
        runner.start(&prompt, options.runner_options.clone()).map_err(|e| EngineError::AgentFailed {
            task: task.id.clone(),
            detail: e.to_string(),
        })?;
        let events = runner.events().map_err(|e| EngineError::AgentFailed {
            task: task.id.clone(),
            detail: e.to_string(),
        })?;
        runner.wait().map_err(|e| EngineError::AgentFailed {
            task: task.id.clone(),
            detail: e.to_string(),
        })?;

        for event in &events {
            tracker.record(event.raw_usage);
        }
        let usage = tracker.snapshot();
        result.input_tokens = usage.input_tokens;
        result.output_tokens = usage.output_tokens;
        result.cost_usd = usage.cost_usd;
        agent.usage.input_tokens = usage.input_tokens;
        agent.usage.output_tokens = usage.output_tokens;
        agent.usage.cost_usd = usage.cost_usd;

        // Commit whatever this attempt produced so the review layers can
        // diff it against the base ref; a failed attempt still leaves a
        // commit behind for the next attempt's critique context.
        vcs.stage(&worktree.path, &[])?;
        let commit_message = format!("{}: attempt {}", task.title, task.attempt_count);
        vcs.commit(&worktree.path, &commit_message)?;
        let diff = vcs.diff(&worktree.path, base_ref, "HEAD")?;

        agent.lifecycle = AgentLifecycle::Validating;
        let outcome = validator::validate(
            task,
            &worktree.path,
            &diff.unified,
            &options.quality_gates,
            baseline,
            options.command_timeout,
            &mut make_runner,
            options.runner_options.clone(),
        )?;

        if outcome.passed {
            agent.lifecycle = AgentLifecycle::Done;
            result.success = true;
            result.diff = diff.unified;
            result.changed_files = diff.changed_files;
            bus.publish(
                Event::new(EventType::TaskCompleted, 0, format!("task '{}' passed validation", task.title))
                    .with_task(task.id.clone())
                    .with_agent(agent.id.clone()),
            );
            return Ok(result);
        }

        critique = outcome.critique.clone();
        if task.attempt_count < options.max_attempts {
            continue;
        }

        bus.publish(
            Event::new(
                EventType::TaskEscalation,
                0,
                format!(
                    "task '{}' exhausted {} attempt(s)",
                    task.title, task.attempt_count
                ),
            )
            .with_task(task.id.clone())
            .with_agent(agent.id.clone())
            .with_error(critique.clone().unwrap_or_default()),
        );
        let reply_rx = bus.escalate(Question {
            task_id: Some(task.id.clone()),
            context: critique.clone().unwrap_or_default(),
            allowed_actions: vec![
                "retry".to_owned(),
                "skip".to_owned(),
                "manual".to_owned(),
                "abort".to_owned(),
            ],
        });
        let response: EscalationResponse = reply_rx.recv().map_err(|_| EngineError::Canceled)?;
        match EscalationDecision::parse(&response.action) {
            Some(EscalationDecision::Retry) => {
                continue;
            }
            Some(EscalationDecision::Abort) | None => {
                agent.lifecycle = AgentLifecycle::Failed;
                result.terminal_error = Some("aborted after escalation".to_owned());
                return Err(EngineError::MaxAttemptsExceeded {
                    task: task.id.clone(),
                    attempts: task.attempt_count,
                });
            }
            Some(EscalationDecision::Skip | EscalationDecision::Manual) => {
                agent.lifecycle = AgentLifecycle::Failed;
                result.terminal_error = critique.clone();
                bus.publish(
                    Event::new(EventType::TaskBlocked, 0, format!("task '{}' blocked by escalation", task.title))
                        .with_task(task.id.clone())
                        .with_agent(agent.id.clone()),
                );
                return Ok(result);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::TaskType;
    use alphie_runner::FixtureRunner;
    use std::path::{Path, PathBuf};
    use std::sync::Arc;

    #[derive(Clone, Default)]
    struct FakeVcs;

    impl Vcs for FakeVcs {
        fn create_worktree(&self, _path: &Path, _branch: &str, _base: &str) -> Result<(), alphie_vcs::VcsError> {
            Ok(())
        }
        fn remove_worktree(&self, _path: &Path) -> Result<(), alphie_vcs::VcsError> {
            Ok(())
        }
        fn create_branch(&self, _name: &str, _base: &str) -> Result<(), alphie_vcs::VcsError> {
            Ok(())
        }
        fn delete_branch(&self, _name: &str, _force: bool) -> Result<(), alphie_vcs::VcsError> {
            Ok(())
        }
        fn merge_no_ff(&self, _repo_path: &Path, _branch: &str) -> Result<alphie_vcs::MergeAttempt, alphie_vcs::VcsError> {
            Ok(alphie_vcs::MergeAttempt::default())
        }
        fn abort_merge(&self, _repo_path: &Path) -> Result<(), alphie_vcs::VcsError> {
            Ok(())
        }
        fn rebase(&self, _repo_path: &Path, _branch: &str, _onto: &str) -> Result<alphie_vcs::MergeAttempt, alphie_vcs::VcsError> {
            Ok(alphie_vcs::MergeAttempt::default())
        }
        fn abort_rebase(&self, _repo_path: &Path) -> Result<(), alphie_vcs::VcsError> {
            Ok(())
        }
        fn conflicted_paths(&self, _repo_path: &Path) -> Result<Vec<String>, alphie_vcs::VcsError> {
            Ok(Vec::new())
        }
        fn read_at_ref(&self, _repo_path: &Path, _git_ref: &str, _path: &str) -> Result<Vec<u8>, alphie_vcs::VcsError> {
            Ok(Vec::new())
        }
        fn diff(&self, _repo_path: &Path, _a: &str, _b: &str) -> Result<alphie_vcs::Diff, alphie_vcs::VcsError> {
            Ok(alphie_vcs::Diff {
                unified: "diff --git a/x b/x".to_owned(),
                changed_files: vec!["x".to_owned()],
            })
        }
        fn checkout_side(&self, _repo_path: &Path, _path: &str, _side: alphie_vcs::FileSide) -> Result<(), alphie_vcs::VcsError> {
            Ok(())
        }
        fn stage(&self, _repo_path: &Path, _paths: &[String]) -> Result<(), alphie_vcs::VcsError> {
            Ok(())
        }
        fn commit(&self, _repo_path: &Path, _message: &str) -> Result<String, alphie_vcs::VcsError> {
            Ok("deadbeef".to_owned())
        }
        fn prune_worktrees(&self, _repo_path: &Path) -> Result<(), alphie_vcs::VcsError> {
            Ok(())
        }
        fn resolve_ref(&self, _repo_path: &Path, _git_ref: &str) -> Result<String, alphie_vcs::VcsError> {
            Ok("deadbeef".to_owned())
        }
        fn reset_hard(&self, _repo_path: &Path, _sha: &str) -> Result<(), alphie_vcs::VcsError> {
            Ok(())
        }
        fn reset_mixed(&self, _repo_path: &Path, _sha: &str) -> Result<(), alphie_vcs::VcsError> {
            Ok(())
        }
    }

    fn opts() -> ExecutorOptions {
        ExecutorOptions {
            max_attempts: 2,
            runner_options: RunnerOptions {
                model: "claude-sonnet".to_owned(),
                workdir: std::env::temp_dir(),
                timeout: Duration::from_secs(30),
            },
            quality_gates: QualityGatesConfig {
                test: false,
                build: false,
                lint: false,
                typecheck: false,
            },
            command_timeout: Duration::from_secs(5),
        }
    }

    fn approved_script() -> Vec<StreamEvent> {
        vec![StreamEvent {
            kind: EventKind::Result,
            text: Some("APPROVED\nlooks good".to_owned()),
            tool_name: None,
            raw_usage: Some(alphie_runner::RawUsage {
                input_tokens: 10,
                output_tokens: 5,
            }),
        }]
    }

    #[test]
    fn execute_succeeds_when_all_layers_approve() {
        let vcs = FakeVcs;
        let bus = Arc::new(EventBus::default());
        let mut task = Task::new("build thing", TaskType::Feature);
        let mut agent = Agent::new(task.id.clone(), PathBuf::from("/tmp/ws"), "agent/x");
        let worktree = Worktree::new("/tmp/ws", "agent/x");
        let baseline = Baseline::empty();

        let result = execute(&vcs, &bus, &mut task, &mut agent, &worktree, "main", &baseline, &opts(), || {
            AgentRunner::Fixture(FixtureRunner::new(approved_script()))
        })
        .unwrap();

        assert!(result.success);
        assert_eq!(result.attempts, 1);
        assert_eq!(agent.lifecycle, AgentLifecycle::Done);
    }

    #[test]
    fn execute_escalates_and_blocks_on_skip() {
        let vcs = FakeVcs;
        let bus = Arc::new(EventBus::default());
        let mut task = Task::new("build thing", TaskType::Feature);
        let mut agent = Agent::new(task.id.clone(), PathBuf::from("/tmp/ws"), "agent/x");
        let worktree = Worktree::new("/tmp/ws", "agent/x");
        let baseline = Baseline::empty();

        let rejected_script = vec![StreamEvent {
            kind: EventKind::Result,
            text: Some("NOT APPROVED\nstill broken".to_owned()),
            tool_name: None,
            raw_usage: None,
        }];

        // Subscribe before kicking off execute() so the escalation event
        // can't be published before anyone is listening for it.
        let rx = bus.subscribe();
        let bus_for_worker = bus.clone();
        let worker = std::thread::spawn(move || {
            execute(
                &vcs,
                &bus_for_worker,
                &mut task,
                &mut agent,
                &worktree,
                "main",
                &baseline,
                &opts(),
                || AgentRunner::Fixture(FixtureRunner::new(rejected_script.clone())),
            )
            .map(|r| (r, task.attempt_count, agent.lifecycle))
        });

        loop {
            let event = rx.recv_timeout(Duration::from_secs(5)).expect("escalation event");
            if event.event_type == EventType::TaskEscalation {
                let id = event_escalation_id(&event);
                bus.respond(
                    id,
                    EscalationResponse {
                        action: "skip".to_owned(),
                        timestamp_ms: 0,
                    },
                );
                break;
            }
        }

        let (result, attempt_count, lifecycle) = worker.join().unwrap().unwrap();
        assert!(!result.success);
        assert_eq!(lifecycle, AgentLifecycle::Failed);
        assert_eq!(attempt_count, 2);
    }

    fn event_escalation_id(event: &Event) -> u64 {
        // The bus doesn't surface the id through a public field on Event in
        // this test helper path; re-derive it from metadata the same way a
        // real consumer would.
        event
            .metadata
            .get("escalation_id")
            .and_then(serde_json::Value::as_u64)
            .expect("escalation event carries an id")
    }
}
