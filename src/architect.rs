//! The Architect Loop (C10, §4.10): parse the spec, audit the repo against
//! it, decompose the gaps into tasks, drain them through the Scheduler,
//! Executor, and Merger, and repeat until complete or a stop condition
//! fires.

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use alphie_runner::{AgentRunner, EventKind, RunnerOptions, StreamEvent};
use alphie_vcs::Vcs;
use serde::Deserialize;

use crate::config::QualityGatesConfig;
use crate::error::EngineError;
use crate::eventbus::EventBus;
use crate::executor::{self, ExecutorOptions};
use crate::isolation::IsolationManager;
use crate::merger::{self, Checkpoint, MergerOptions};
use crate::model::agent::Agent;
use crate::model::audit::{AuditReport, Gap};
use crate::model::dag::Dag;
use crate::model::event::{Event, EventType};
use crate::model::task::{Task, TaskId, TaskStatus};
use crate::scheduler::admission::{self, InFlight};
use crate::validator::{self, Baseline};

/// Why an Architect Loop session ended (§4.10 Stop conditions).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StopReason {
    /// `final_verification` passed with the audit at 100% complete.
    Complete,
    /// `max_iterations` was reached without completing.
    MaxIterations,
    /// Cumulative cost exceeded `token_budget`.
    BudgetExceeded,
    /// `no_progress_limit` consecutive iterations made no progress.
    NoProgress,
}

/// Tuning for one Architect Loop session (§4.10).
pub struct ArchitectOptions {
    /// Stop after this many iterations without completing.
    pub max_iterations: u32,
    /// Cumulative cost budget in USD; `None` is unbounded.
    pub cost_budget_usd: Option<f64>,
    /// Consecutive no-progress iterations before `StopReason::NoProgress`.
    pub no_progress_limit: u32,
    /// Concurrency cap passed to the Scheduler's admission rule 1.
    pub max_agents: u32,
    /// Per-task Executor tuning.
    pub executor_options: ExecutorOptions,
    /// Merger strategy-ladder tuning.
    pub merger_options: MergerOptions,
    /// Model/workdir/timeout used for auditor and final-verification agents.
    pub reviewer_options: RunnerOptions,
    /// Per-command timeout for the final build/test gate.
    pub command_timeout: Duration,
}

/// The terminal outcome of a whole Architect Loop session.
#[derive(Clone, Debug, PartialEq)]
pub struct ArchitectResult {
    /// Why the loop stopped.
    pub reason: StopReason,
    /// The final audit report.
    pub report: AuditReport,
    /// Iterations actually run.
    pub iterations: u32,
    /// Cumulative estimated cost across every task this session.
    pub cost_usd: f64,
}

/// Read the spec file from disk (§4.10 `parse_spec`).
///
/// # Errors
/// Returns `EngineError::Io` if the file cannot be read.
pub fn parse_spec(path: &Path) -> Result<String, EngineError> {
    Ok(std::fs::read_to_string(path)?)
}

/// Render the prompt instructing an agent to audit the repository against
/// `spec` and report per-feature completion (§4.10 `audit`).
#[must_use]
pub fn render_audit_prompt(spec: &str) -> String {
    format!(
        "You are auditing a repository's current state against the specification below. Identify \
         every distinct feature the specification calls for, inspect the repository, and report \
         each feature's completion status.\n\nSpecification:\n{spec}\n\n\
         Respond with only a JSON object of the shape \
         {{\"statuses\": {{\"<feature id>\": \"COMPLETE\"|\"PARTIAL\"|\"MISSING\"}}, \
         \"evidence\": {{\"<feature id>\": \"...\"}}, \
         \"gaps\": [{{\"feature_id\": \"...\", \"description\": \"...\", \"suggested_action\": \"...\"}}]}}, \
         with one gap entry per non-COMPLETE feature. Nothing else."
    )
}

/// Render the natural-language request fed to the Decomposer for the
/// current gap set (§4.10 `render_gap_request`).
#[must_use]
pub fn render_gap_request(gaps: &[Gap]) -> String {
    let mut request = String::from(
        "Close the following gaps between the specification and the current repository state:\n\n",
    );
    for gap in gaps {
        request.push_str(&format!(
            "- [{}] {}\n  Suggested action: {}\n",
            gap.feature_id, gap.description, gap.suggested_action
        ));
    }
    request
}

#[derive(Deserialize)]
struct RawAuditResponse {
    statuses: std::collections::BTreeMap<String, crate::model::audit::FeatureStatus>,
    #[serde(default)]
    evidence: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    gaps: Vec<Gap>,
}

fn final_result_text(events: &[StreamEvent]) -> Option<String> {
    events
        .iter()
        .rev()
        .find(|e| e.kind == EventKind::Result)
        .or_else(|| events.iter().rev().find(|e| e.kind == EventKind::Assistant))
        .and_then(|e| e.text.clone())
}

/// Find the outermost `{ … }` block in `text` (§4.8 uses the same pattern
/// for the semantic merge agent's response).
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end >= start).then(|| &text[start..=end])
}

fn drive_agent(
    runner: &mut AgentRunner,
    prompt: &str,
    options: RunnerOptions,
) -> Result<String, EngineError> {
    let task = TaskId::new();
    runner.start(prompt, options).map_err(|e| EngineError::AgentFailed {
        task: task.clone(),
        detail: e.to_string(),
    })?;
    let events = runner.events().map_err(|e| EngineError::AgentFailed {
        task: task.clone(),
        detail: e.to_string(),
    })?;
    runner.wait().map_err(|e| EngineError::AgentFailed { task, detail: e.to_string() })?;
    Ok(final_result_text(&events).unwrap_or_default())
}

/// Drive an `AgentRunner` to audit the repository against `spec` (§4.10
/// `audit`).
///
/// # Errors
/// Returns `EngineError::AgentFailed` if the auditor agent cannot be driven,
/// or `EngineError::MalformedDecomposition` if its output contains no
/// parseable audit JSON object.
pub fn audit(runner: &mut AgentRunner, spec: &str, options: RunnerOptions) -> Result<AuditReport, EngineError> {
    let text = drive_agent(runner, &render_audit_prompt(spec), options)?;
    let object = extract_json_object(&text).ok_or_else(|| EngineError::MalformedDecomposition {
        detail: "no JSON object found in auditor output".to_owned(),
    })?;
    let raw: RawAuditResponse = serde_json::from_str(object)
        .map_err(|e| EngineError::MalformedDecomposition { detail: e.to_string() })?;
    Ok(AuditReport { statuses: raw.statuses, evidence: raw.evidence, gaps: raw.gaps })
}

fn parse_approval(text: &str) -> bool {
    text.lines()
        .find(|l| !l.trim().is_empty())
        .is_some_and(|first| first.contains("APPROVED") && !first.contains("NOT APPROVED"))
}

/// The three-layer whole-repo gate (§4.10 `final_verification`): the audit
/// is 100% `COMPLETE`, a full build+test passes, and a "principal-engineer"
/// semantic review of the aggregated diff approves.
///
/// # Errors
/// Returns `EngineError::AgentFailed` if the reviewer agent cannot be run,
/// or a VCS error if the aggregated diff cannot be computed.
pub fn final_verification(
    vcs: &impl Vcs,
    session_repo: &Path,
    base_ref: &str,
    gates: &QualityGatesConfig,
    baseline: &Baseline,
    command_timeout: Duration,
    report: &AuditReport,
    mut make_reviewer: impl FnMut() -> AgentRunner,
    reviewer_options: RunnerOptions,
) -> Result<bool, EngineError> {
    if !report.is_complete() {
        return Ok(false);
    }

    let build_test = validator::build_test_layer(session_repo, gates, baseline, command_timeout);
    if !build_test.passed {
        return Ok(false);
    }

    let diff = vcs.diff(session_repo, base_ref, "HEAD")?;
    let prompt = format!(
        "You are a principal engineer performing final sign-off on an aggregated set of changes \
         against the original specification.\n\nUnified diff:\n{}\n\nRespond with a first line of \
         either APPROVED or NOT APPROVED, followed by your reasoning.",
        diff.unified
    );
    let mut runner = make_reviewer();
    let text = drive_agent(&mut runner, &prompt, reviewer_options)?;
    Ok(parse_approval(&text))
}

/// Cumulative counters threaded through a drained batch of tasks.
#[derive(Default)]
struct DrainTotals {
    cost_usd: Mutex<f64>,
    agent_seq: AtomicU64,
}

#[allow(clippy::too_many_arguments)]
fn run_one_task<V: Vcs + Sync>(
    vcs: &V,
    bus: &EventBus,
    isolation: &IsolationManager<V>,
    session_repo: &Path,
    session_branch: &str,
    baseline: &Baseline,
    mut task: Task,
    merge_lock: &Mutex<()>,
    checkpoints: &Mutex<Vec<Checkpoint>>,
    options: &ArchitectOptions,
    agent_runner_factory: &(impl Fn() -> AgentRunner + Sync),
    reviewer_runner_factory: &(impl Fn() -> AgentRunner + Sync),
    totals: &DrainTotals,
) -> (TaskId, TaskStatus) {
    let seq = totals.agent_seq.fetch_add(1, Ordering::SeqCst);
    let mut agent = Agent::new(task.id.clone(), std::path::PathBuf::new(), format!("agent/pending-{seq}"));
    let worktree = match isolation.allocate(&agent.id) {
        Ok(wt) => wt,
        Err(_) => return (task.id, TaskStatus::Failed),
    };
    agent.workdir = worktree.path.clone();
    agent.branch = worktree.branch.clone();

    let exec_result = executor::execute(
        vcs,
        bus,
        &mut task,
        &mut agent,
        &worktree,
        session_branch,
        baseline,
        &options.executor_options,
        agent_runner_factory,
    );

    let outcome = match exec_result {
        Ok(result) if result.success => {
            let merge_result = {
                let _guard = merge_lock.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                let mut cps = checkpoints.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
                merger::merge(
                    vcs,
                    bus,
                    &mut cps,
                    session_repo,
                    session_branch,
                    &agent.branch,
                    &task,
                    &agent.id,
                    &options.merger_options,
                    reviewer_runner_factory,
                )
            };
            match merge_result {
                Ok(mr) if mr.success => TaskStatus::Completed,
                Ok(_) => TaskStatus::Blocked,
                Err(_) => TaskStatus::Failed,
            }
        }
        Ok(_) => TaskStatus::Blocked,
        Err(_) => TaskStatus::Failed,
    };

    {
        let mut cost = totals.cost_usd.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        *cost += agent.usage.cost_usd;
    }

    isolation.release(&agent.id);
    (task.id, outcome)
}

/// Best-effort extraction of a panic payload's message, for the `TaskFailed`
/// event a caught worker panic is converted into (§7).
fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

/// Drive `dag` to completion (§4.10 `scheduler.run_until_drained`):
/// repeatedly admit the ready set (§4.9), execute and merge each admitted
/// task concurrently, and apply the resulting status transitions, until no
/// task remains admissible.
///
/// # Errors
/// Never returns `Err` directly — per-task failures are reflected as
/// `failed`/`blocked` status on the returned `Dag` rather than aborting the
/// whole drain, matching §7's "VCS errors: fatal to the current task...
/// other tasks continue."
#[allow(clippy::too_many_arguments)]
pub fn drain_dag<V: Vcs + Sync>(
    vcs: &V,
    bus: &Arc<EventBus>,
    isolation: &IsolationManager<V>,
    session_repo: &Path,
    session_branch: &str,
    baseline: &Baseline,
    mut dag: Dag,
    options: &ArchitectOptions,
    agent_runner_factory: &(impl Fn() -> AgentRunner + Sync),
    reviewer_runner_factory: &(impl Fn() -> AgentRunner + Sync),
) -> (Dag, f64) {
    let checkpoints: Mutex<Vec<Checkpoint>> = Mutex::new(Vec::new());
    let merge_lock: Mutex<()> = Mutex::new(());
    let totals = DrainTotals::default();
    let mut in_flight: Vec<InFlight> = Vec::new();

    loop {
        let admitted = admission::admit(&dag, &in_flight, options.max_agents);
        if admitted.is_empty() {
            break;
        }

        admission::mark_ready(&mut dag, &admitted);
        for id in &admitted {
            admission::mark_in_progress(&mut dag, id);
        }

        let batch: Vec<Task> = admitted.iter().filter_map(|id| dag.get(id).cloned()).collect();
        in_flight = batch
            .iter()
            .map(|t| InFlight { task_id: t.id.clone(), file_boundaries: t.file_boundaries.clone() })
            .collect();

        let outcomes: Vec<(TaskId, TaskStatus)> = std::thread::scope(|scope| {
            let handles: Vec<_> = batch
                .into_iter()
                .map(|task| {
                    let task_id = task.id.clone();
                    let handle = scope.spawn(|| {
                        std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                            run_one_task(
                                vcs,
                                bus,
                                isolation,
                                session_repo,
                                session_branch,
                                baseline,
                                task,
                                &merge_lock,
                                &checkpoints,
                                options,
                                agent_runner_factory,
                                reviewer_runner_factory,
                                &totals,
                            )
                        }))
                    });
                    (task_id, handle)
                })
                .collect();
            handles
                .into_iter()
                .map(|(task_id, handle)| {
                    // A worker panic never brings down the scheduler (§7): it
                    // is caught at this boundary and reported as a failed
                    // task instead of propagating.
                    match handle.join().and_then(|r| r) {
                        Ok(outcome) => outcome,
                        Err(payload) => {
                            let detail = panic_message(&payload);
                            bus.publish(
                                Event::new(EventType::TaskFailed, 0, format!("task worker panicked: {detail}"))
                                    .with_task(task_id.clone())
                                    .with_error(detail),
                            );
                            (task_id, TaskStatus::Failed)
                        }
                    }
                })
                .collect()
        });

        for (id, status) in outcomes {
            if let Some(t) = dag.get_mut(&id) {
                t.status = status;
            }
        }
        in_flight.clear();
    }

    let cost = *totals.cost_usd.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    (dag, cost)
}

/// Run a whole Architect Loop session (§4.10): parse the spec once, then
/// loop `audit -> decompose gaps -> drain -> iterate` until `final_verification`
/// passes or a stop condition fires.
///
/// # Errors
/// Returns `EngineError` for input errors the loop cannot recover from
/// (unreadable spec file, an auditor agent that never produces parseable
/// output). Per-task failures during a drain do not abort the session —
/// they surface as gaps on the next audit instead.
#[allow(clippy::too_many_arguments)]
pub fn run<V: Vcs + Sync>(
    vcs: &V,
    bus: &Arc<EventBus>,
    isolation: &IsolationManager<V>,
    session_repo: &Path,
    session_branch: &str,
    spec_path: &Path,
    baseline: &Baseline,
    options: &ArchitectOptions,
    mut make_auditor: impl FnMut() -> AgentRunner,
    decompose_runner_factory: impl Fn() -> AgentRunner + Sync,
    agent_runner_factory: impl Fn() -> AgentRunner + Sync,
    reviewer_runner_factory: impl Fn() -> AgentRunner + Sync,
) -> Result<ArchitectResult, EngineError> {
    let spec = parse_spec(spec_path)?;

    let mut iteration: u32 = 1;
    let mut cumulative_cost = 0.0_f64;
    let mut no_progress = 0_u32;
    let mut best_completion = 0.0_f64;
    let mut best_gap_count = usize::MAX;
    let mut last_report = AuditReport::default();

    loop {
        let mut auditor = make_auditor();
        let report = audit(&mut auditor, &spec, options.reviewer_options.clone())?;
        last_report = report.clone();

        if report.gaps.is_empty() {
            let passed = final_verification(
                vcs,
                session_repo,
                session_branch,
                &options.executor_options.quality_gates,
                baseline,
                options.command_timeout,
                &report,
                &reviewer_runner_factory,
                options.reviewer_options.clone(),
            )?;
            if passed {
                bus.publish(Event::new(EventType::SessionDone, 0, "architect loop complete"));
                return Ok(ArchitectResult {
                    reason: StopReason::Complete,
                    report,
                    iterations: iteration,
                    cost_usd: cumulative_cost,
                });
            }
            // Something regressed after an empty gap set; loop again so the
            // next audit can surface it as a fresh gap.
        } else {
            let request = render_gap_request(&report.gaps);
            let mut decomposer = decompose_runner_factory();
            let dag = crate::decompose::decompose(
                &mut decomposer,
                &request,
                Some(&spec),
                options.reviewer_options.clone(),
            )?;

            let (_drained, cost) = drain_dag(
                vcs,
                bus,
                isolation,
                session_repo,
                session_branch,
                baseline,
                dag,
                options,
                &agent_runner_factory,
                &reviewer_runner_factory,
            );
            cumulative_cost += cost;
        }

        let completion = report.completion_ratio();
        if completion > best_completion || report.gaps.len() < best_gap_count {
            best_completion = completion.max(best_completion);
            best_gap_count = best_gap_count.min(report.gaps.len());
            no_progress = 0;
        } else {
            no_progress += 1;
        }

        if let Some(budget) = options.cost_budget_usd {
            if cumulative_cost > budget {
                return Ok(ArchitectResult {
                    reason: StopReason::BudgetExceeded,
                    report: last_report,
                    iterations: iteration,
                    cost_usd: cumulative_cost,
                });
            }
        }
        if no_progress >= options.no_progress_limit {
            return Ok(ArchitectResult {
                reason: StopReason::NoProgress,
                report: last_report,
                iterations: iteration,
                cost_usd: cumulative_cost,
            });
        }
        if iteration >= options.max_iterations {
            return Ok(ArchitectResult {
                reason: StopReason::MaxIterations,
                report: last_report,
                iterations: iteration,
                cost_usd: cumulative_cost,
            });
        }

        iteration += 1;
    }
}
