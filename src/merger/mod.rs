//! The Merger (C8, §4.8): integrates a finished agent branch onto the
//! session branch through a strategy ladder — critical-file pre-merge,
//! plain merge, conflict-triggered rebase retry, structured merge,
//! semantic merge, then escalation.

mod structured;

use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};

use alphie_runner::{AgentRunner, EventKind, RunnerOptions, StreamEvent};
use alphie_vcs::{FileSide, Vcs};
use serde::Deserialize;

use crate::criticalfiles::critical_key;
use crate::error::EngineError;
use crate::eventbus::{EscalationResponse, EventBus, Question};
use crate::model::agent::AgentId;
use crate::model::event::{Event, EventType};
use crate::model::merge_result::MergeResult;
use crate::model::task::{Task, TaskId};
use structured::StructuredFile;

const DEFAULT_REBASE_RETRIES: u32 = 3;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX))
        .unwrap_or(0)
}

/// A session-branch commit recorded before a merge attempt, so the Session
/// can roll back to the last known-good state (§4.8 Checkpointing).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Checkpoint {
    /// The agent whose merge this checkpoint precedes.
    pub agent_id: AgentId,
    /// The task that agent was executing.
    pub task_id: TaskId,
    /// The session-branch commit id before the merge attempt.
    pub sha: String,
    /// When the checkpoint was recorded.
    pub timestamp_ms: u64,
}

/// Reset mode for [`rollback_to`] (§4.8 Checkpointing).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RollbackMode {
    /// Discard the working tree along with history.
    Hard,
    /// Move `HEAD`/index only, preserving working-tree contents.
    Mixed,
}

/// Reset the session branch to `checkpoint.sha` (§4.8 Checkpointing).
///
/// # Errors
/// Returns `EngineError::VcsError` if the reset fails.
pub fn rollback_to(
    vcs: &impl Vcs,
    session_repo: &Path,
    checkpoint: &Checkpoint,
    mode: RollbackMode,
) -> Result<(), EngineError> {
    match mode {
        RollbackMode::Hard => vcs.reset_hard(session_repo, &checkpoint.sha)?,
        RollbackMode::Mixed => vcs.reset_mixed(session_repo, &checkpoint.sha)?,
    }
    Ok(())
}

/// Tunables for [`merge`].
pub struct MergerOptions {
    /// Bounded retries for the abort-rebase-retry rung (§4.8 step 3).
    pub rebase_retries: u32,
    /// Whether an exhausted ladder escalates via the Event Bus, vs. failing
    /// outright.
    pub escalation_enabled: bool,
    /// Options passed to the semantic-merge reviewer's `AgentRunner`.
    pub reviewer_options: RunnerOptions,
}

impl MergerOptions {
    /// Build options with the default rebase-retry bound and escalation on.
    #[must_use]
    pub fn new(reviewer_options: RunnerOptions) -> Self {
        Self {
            rebase_retries: DEFAULT_REBASE_RETRIES,
            escalation_enabled: true,
            reviewer_options,
        }
    }
}

#[derive(Deserialize)]
struct SemanticMergeResponse {
    merged_files: std::collections::BTreeMap<String, String>,
    #[serde(default)]
    #[allow(dead_code)]
    reasoning: String,
}

fn final_result_text(events: &[StreamEvent]) -> Option<String> {
    events
        .iter()
        .rev()
        .find(|e| e.kind == EventKind::Result)
        .or_else(|| events.iter().rev().find(|e| e.kind == EventKind::Assistant))
        .and_then(|e| e.text.clone())
}

fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end >= start).then(|| &text[start..=end])
}

/// Attempt a structured (non-agent) merge of every conflicted critical
/// file, applying JSON deep-merge / line-union rules and scheduling
/// lockfile regeneration commands (§4.8 step 1 and step 4).
///
/// Returns `Ok(None)` if any conflicted path isn't recognized as critical,
/// in which case the caller should fall through to semantic merge.
fn try_structured_merge(
    vcs: &impl Vcs,
    repo: &Path,
    session_branch: &str,
    agent_branch: &str,
    conflicts: &[String],
) -> Result<Option<(Vec<String>, Vec<&'static str>)>, EngineError> {
    if conflicts.is_empty() || !conflicts.iter().all(|p| critical_key(p).is_some()) {
        return Ok(None);
    }

    let mut touched = Vec::new();
    let mut regen_commands = Vec::new();
    for path in conflicts {
        let ours = vcs.read_at_ref(repo, session_branch, path).unwrap_or_default();
        let theirs = vcs.read_at_ref(repo, agent_branch, path).unwrap_or_default();
        match structured::merge_file(path, &ours, &theirs) {
            StructuredFile::Merged(bytes) => {
                std::fs::write(repo.join(path), bytes)?;
                touched.push(path.clone());
            }
            StructuredFile::Regenerate(cmd) => {
                vcs.checkout_side(repo, path, FileSide::Theirs)?;
                touched.push(path.clone());
                regen_commands.push(cmd);
            }
        }
    }
    vcs.stage(repo, &touched)?;
    Ok(Some((touched, regen_commands)))
}

/// Ask a reviewer agent to semantically merge the remaining conflicted
/// files (§4.8 step 5).
///
/// # Errors
/// Returns `EngineError::AgentFailed` if the reviewer cannot be run, or
/// `EngineError::MergeConflict` if it produces no parseable merge.
fn try_semantic_merge(
    vcs: &impl Vcs,
    repo: &Path,
    session_branch: &str,
    agent_branch: &str,
    task: &Task,
    conflicts: &[String],
    runner: &mut AgentRunner,
    options: RunnerOptions,
) -> Result<Vec<String>, EngineError> {
    let mut sides = String::new();
    for path in conflicts {
        let ours = vcs.read_at_ref(repo, session_branch, path).unwrap_or_default();
        let theirs = vcs.read_at_ref(repo, agent_branch, path).unwrap_or_default();
        sides.push_str(&format!(
            "--- {path} (session branch) ---\n{}\n--- {path} ({agent_branch}) ---\n{}\n\n",
            String::from_utf8_lossy(&ours),
            String::from_utf8_lossy(&theirs),
        ));
    }
    let prompt = format!(
        "Task: {}\n{}\n\nThe following files conflict between the session branch and this \
         task's branch. Produce a merged version of each file that preserves both sides' intent. \
         Respond with a single JSON object: {{\"merged_files\": {{\"path\": \"full file \
         content\"}}, \"reasoning\": \"...\"}}\n\n{sides}",
        task.title, task.description
    );

    runner
        .start(&prompt, options)
        .map_err(|e| EngineError::AgentFailed { task: task.id.clone(), detail: e.to_string() })?;
    let events = runner
        .events()
        .map_err(|e| EngineError::AgentFailed { task: task.id.clone(), detail: e.to_string() })?;
    runner
        .wait()
        .map_err(|e| EngineError::AgentFailed { task: task.id.clone(), detail: e.to_string() })?;

    let text = final_result_text(&events).unwrap_or_default();
    let object = extract_json_object(&text).ok_or_else(|| EngineError::MergeConflict {
        task: task.id.clone(),
        conflicts: conflicts.to_vec(),
    })?;
    let parsed: SemanticMergeResponse = serde_json::from_str(object).map_err(|_| EngineError::MergeConflict {
        task: task.id.clone(),
        conflicts: conflicts.to_vec(),
    })?;

    let mut touched = Vec::with_capacity(parsed.merged_files.len());
    for (path, content) in parsed.merged_files {
        std::fs::write(repo.join(&path), content)?;
        touched.push(path);
    }
    vcs.stage(repo, &touched)?;
    Ok(touched)
}

/// Resolve the escalation decision against a still-mid-merge `repo` (§4.8
/// step 6). `accept_session`/`accept_agent` finish the in-progress merge by
/// resolving every conflicted path to one side; the remaining actions abort
/// it.
fn apply_escalation_decision(
    vcs: &impl Vcs,
    repo: &Path,
    checkpoint: &Checkpoint,
    conflicts: &[String],
    action: &str,
) -> Result<MergeResult, EngineError> {
    match action {
        "accept_session" => {
            for path in conflicts {
                vcs.checkout_side(repo, path, FileSide::Ours)?;
            }
            vcs.stage(repo, conflicts)?;
            let sha = vcs.commit(repo, "merge: accept session branch (escalation)")?;
            let diff = vcs.diff(repo, &checkpoint.sha, &sha)?;
            Ok(MergeResult::clean(diff.changed_files, diff.unified))
        }
        "accept_agent" => {
            for path in conflicts {
                vcs.checkout_side(repo, path, FileSide::Theirs)?;
            }
            vcs.stage(repo, conflicts)?;
            let sha = vcs.commit(repo, "merge: accept agent branch (escalation)")?;
            let diff = vcs.diff(repo, &checkpoint.sha, &sha)?;
            Ok(MergeResult::clean(diff.changed_files, diff.unified))
        }
        "manual" | "skip_agent" => {
            vcs.abort_merge(repo)?;
            Ok(MergeResult::failed(conflicts.to_vec(), format!("escalation: {action}, task left blocked")))
        }
        "abort_session" => {
            vcs.abort_merge(repo)?;
            rollback_to(vcs, repo, checkpoint, RollbackMode::Hard)?;
            Ok(MergeResult::failed(conflicts.to_vec(), "escalation: session rolled back"))
        }
        other => {
            vcs.abort_merge(repo)?;
            Ok(MergeResult::failed(conflicts.to_vec(), format!("unrecognized escalation action '{other}'")))
        }
    }
}

/// Run the full merge strategy ladder for one finished agent branch
/// (§4.8). `session_repo` is checked out on `session_branch`.
///
/// # Errors
/// Returns `EngineError::VcsError` for VCS-level failures, or
/// `EngineError::AgentFailed` if the semantic-merge reviewer cannot run.
#[allow(clippy::too_many_arguments)]
pub fn merge(
    vcs: &impl Vcs,
    bus: &EventBus,
    checkpoints: &mut Vec<Checkpoint>,
    session_repo: &Path,
    session_branch: &str,
    agent_branch: &str,
    task: &Task,
    agent_id: &AgentId,
    options: &MergerOptions,
    mut merge_reviewer: impl FnMut() -> AgentRunner,
) -> Result<MergeResult, EngineError> {
    bus.publish(
        Event::new(EventType::MergeStarted, now_ms(), format!("merging task '{}'", task.title))
            .with_task(task.id.clone())
            .with_agent(agent_id.clone()),
    );

    let checkpoint_sha = vcs.resolve_ref(session_repo, "HEAD")?;
    let checkpoint = Checkpoint {
        agent_id: agent_id.clone(),
        task_id: task.id.clone(),
        sha: checkpoint_sha.clone(),
        timestamp_ms: now_ms(),
    };
    checkpoints.push(checkpoint.clone());

    // Step 1: critical-file pre-merge, before attempting a plain merge at
    // all, when this task's own boundaries are known-critical.
    if task.file_boundaries.iter().any(|b| critical_key(b).is_some()) {
        let attempt = vcs.merge_no_ff(session_repo, agent_branch)?;
        if attempt.clean {
            return finish_clean(vcs, bus, session_repo, &checkpoint_sha, task, agent_id);
        }
        let conflicts = vcs.conflicted_paths(session_repo)?;
        if let Some((_touched, regen)) =
            try_structured_merge(vcs, session_repo, session_branch, agent_branch, &conflicts)?
        {
            let sha = vcs.commit(session_repo, &format!("merge: {} (structured)", task.title))?;
            let diff = vcs.diff(session_repo, &checkpoint_sha, &sha)?;
            let mut result = MergeResult::clean(diff.changed_files, diff.unified);
            result.needs_semantic_merge = false;
            if !regen.is_empty() {
                result
                    .error
                    .get_or_insert_with(String::new)
                    .push_str(&format!("pending regeneration: {}", regen.join(", ")));
            }
            bus.publish(merge_completed_event(task, agent_id));
            return Ok(result);
        }
        vcs.abort_merge(session_repo)?;
    }

    // Step 2: plain merge.
    let attempt = vcs.merge_no_ff(session_repo, agent_branch)?;
    if attempt.clean {
        return finish_clean(vcs, bus, session_repo, &checkpoint_sha, task, agent_id);
    }

    // Step 3: abort, rebase the agent branch onto the session branch, retry.
    // Each failed attempt is aborted before the next retry, except the last
    // one: that one is left mid-merge so step 4/5 can resolve the remaining
    // conflicted paths in place rather than redoing the whole merge.
    let mut last_conflicts = attempt.conflicts;
    vcs.abort_merge(session_repo)?;
    let mut landed = false;
    let mut mid_merge = false;
    for attempt_no in 0..options.rebase_retries {
        let rebase_attempt = vcs.rebase(session_repo, agent_branch, session_branch)?;
        if !rebase_attempt.clean {
            vcs.abort_rebase(session_repo)?;
            last_conflicts = rebase_attempt.conflicts;
            continue;
        }
        let retry = vcs.merge_no_ff(session_repo, agent_branch)?;
        if retry.clean {
            landed = true;
            break;
        }
        last_conflicts = retry.conflicts;
        if attempt_no + 1 < options.rebase_retries {
            vcs.abort_merge(session_repo)?;
        } else {
            mid_merge = true;
        }
    }
    if landed {
        return finish_clean(vcs, bus, session_repo, &checkpoint_sha, task, agent_id);
    }

    // The final retry's rebase itself conflicted (rather than the merge),
    // so the working tree was left clean with no merge in progress. Start
    // one last merge to bring the agent branch's non-conflicting changes
    // into the index before resolving the remaining conflicts in place.
    if !mid_merge {
        let final_attempt = vcs.merge_no_ff(session_repo, agent_branch)?;
        if final_attempt.clean {
            return finish_clean(vcs, bus, session_repo, &checkpoint_sha, task, agent_id);
        }
        last_conflicts = final_attempt.conflicts;
    }

    // Step 4: structured merge for remaining conflicts, if all critical.
    if let Some((_touched, regen)) =
        try_structured_merge(vcs, session_repo, session_branch, agent_branch, &last_conflicts)?
    {
        let sha = vcs.commit(session_repo, &format!("merge: {} (structured)", task.title))?;
        let diff = vcs.diff(session_repo, &checkpoint_sha, &sha)?;
        let mut result = MergeResult::clean(diff.changed_files, diff.unified);
        if !regen.is_empty() {
            result.error = Some(format!("pending regeneration: {}", regen.join(", ")));
        }
        bus.publish(merge_completed_event(task, agent_id));
        return Ok(result);
    }

    // Step 5: semantic merge.
    let mut reviewer = merge_reviewer();
    match try_semantic_merge(
        vcs,
        session_repo,
        session_branch,
        agent_branch,
        task,
        &last_conflicts,
        &mut reviewer,
        options.reviewer_options.clone(),
    ) {
        Ok(_touched) => {
            let sha = vcs.commit(session_repo, &format!("merge: {} (semantic)", task.title))?;
            let diff = vcs.diff(session_repo, &checkpoint_sha, &sha)?;
            let mut result = MergeResult::clean(diff.changed_files, diff.unified);
            result.needs_semantic_merge = true;
            bus.publish(merge_completed_event(task, agent_id));
            return Ok(result);
        }
        Err(EngineError::MergeConflict { .. }) => {}
        Err(other) => return Err(other),
    }

    // Step 6: escalation. The repo is still mid-merge at this point (steps
    // 4/5 did not finish or abort it); `apply_escalation_decision` resolves
    // or aborts depending on the chosen action.
    if !options.escalation_enabled {
        vcs.abort_merge(session_repo)?;
        return Ok(MergeResult::failed(last_conflicts, "merge ladder exhausted, escalation disabled"));
    }

    bus.publish(
        Event::new(
            EventType::MergeConflict,
            now_ms(),
            format!("{} file(s) still conflicted on '{}'", last_conflicts.len(), task.title),
        )
        .with_task(task.id.clone())
        .with_agent(agent_id.clone()),
    );
    let reply_rx = bus.escalate(Question {
        task_id: Some(task.id.clone()),
        context: format!("merge conflict on {} file(s): {}", last_conflicts.len(), last_conflicts.join(", ")),
        allowed_actions: vec![
            "accept_session".to_owned(),
            "accept_agent".to_owned(),
            "manual".to_owned(),
            "skip_agent".to_owned(),
            "abort_session".to_owned(),
        ],
    });
    let response: EscalationResponse = reply_rx.recv().map_err(|_| EngineError::Canceled)?;
    apply_escalation_decision(vcs, session_repo, &checkpoint, &last_conflicts, &response.action)
}

fn finish_clean(
    vcs: &impl Vcs,
    bus: &EventBus,
    session_repo: &Path,
    from_sha: &str,
    task: &Task,
    agent_id: &AgentId,
) -> Result<MergeResult, EngineError> {
    let to_sha = vcs.resolve_ref(session_repo, "HEAD")?;
    let diff = vcs.diff(session_repo, from_sha, &to_sha)?;
    bus.publish(merge_completed_event(task, agent_id));
    Ok(MergeResult::clean(diff.changed_files, diff.unified))
}

fn merge_completed_event(task: &Task, agent_id: &AgentId) -> Event {
    Event::new(EventType::MergeCompleted, now_ms(), format!("merged task '{}'", task.title))
        .with_task(task.id.clone())
        .with_agent(agent_id.clone())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::task::TaskType;
    use alphie_runner::FixtureRunner;
    use std::time::Duration;
    use alphie_vcs::{Diff, MergeAttempt, VcsError};
    use std::cell::RefCell;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    /// A scriptable [`Vcs`] double: `merge_attempts` is drained in order by
    /// successive `merge_no_ff` calls, the last entry repeating once
    /// exhausted. Everything else is a no-op success.
    struct ScriptedVcs {
        merge_attempts: RefCell<std::collections::VecDeque<MergeAttempt>>,
        rebase_clean: bool,
        commits: AtomicUsize,
    }

    impl ScriptedVcs {
        fn new(merge_attempts: Vec<MergeAttempt>, rebase_clean: bool) -> Self {
            Self {
                merge_attempts: RefCell::new(merge_attempts.into()),
                rebase_clean,
                commits: AtomicUsize::new(0),
            }
        }
    }

    impl Vcs for ScriptedVcs {
        fn create_worktree(&self, _path: &Path, _branch: &str, _base: &str) -> Result<(), VcsError> {
            Ok(())
        }
        fn remove_worktree(&self, _path: &Path) -> Result<(), VcsError> {
            Ok(())
        }
        fn create_branch(&self, _name: &str, _base: &str) -> Result<(), VcsError> {
            Ok(())
        }
        fn delete_branch(&self, _name: &str, _force: bool) -> Result<(), VcsError> {
            Ok(())
        }
        fn merge_no_ff(&self, _repo_path: &Path, _branch: &str) -> Result<MergeAttempt, VcsError> {
            let mut attempts = self.merge_attempts.borrow_mut();
            if attempts.len() > 1 {
                Ok(attempts.pop_front().unwrap_or_default())
            } else {
                Ok(attempts.front().cloned().unwrap_or_default())
            }
        }
        fn abort_merge(&self, _repo_path: &Path) -> Result<(), VcsError> {
            Ok(())
        }
        fn rebase(&self, _repo_path: &Path, _branch: &str, _onto: &str) -> Result<MergeAttempt, VcsError> {
            Ok(MergeAttempt {
                clean: self.rebase_clean,
                conflicts: if self.rebase_clean { Vec::new() } else { vec!["README.md".to_owned()] },
            })
        }
        fn abort_rebase(&self, _repo_path: &Path) -> Result<(), VcsError> {
            Ok(())
        }
        fn conflicted_paths(&self, _repo_path: &Path) -> Result<Vec<String>, VcsError> {
            Ok(self.merge_attempts.borrow().front().cloned().unwrap_or_default().conflicts)
        }
        fn read_at_ref(&self, _repo_path: &Path, _git_ref: &str, _path: &str) -> Result<Vec<u8>, VcsError> {
            Ok(b"content".to_vec())
        }
        fn diff(&self, _repo_path: &Path, _a: &str, _b: &str) -> Result<Diff, VcsError> {
            Ok(Diff {
                unified: "diff --git a/x b/x".to_owned(),
                changed_files: vec!["x".to_owned()],
            })
        }
        fn checkout_side(&self, _repo_path: &Path, _path: &str, _side: alphie_vcs::FileSide) -> Result<(), VcsError> {
            Ok(())
        }
        fn stage(&self, _repo_path: &Path, _paths: &[String]) -> Result<(), VcsError> {
            Ok(())
        }
        fn commit(&self, _repo_path: &Path, _message: &str) -> Result<String, VcsError> {
            let n = self.commits.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            Ok(format!("sha-{n}"))
        }
        fn prune_worktrees(&self, _repo_path: &Path) -> Result<(), VcsError> {
            Ok(())
        }
        fn resolve_ref(&self, _repo_path: &Path, _git_ref: &str) -> Result<String, VcsError> {
            Ok("base-sha".to_owned())
        }
        fn reset_hard(&self, _repo_path: &Path, _sha: &str) -> Result<(), VcsError> {
            Ok(())
        }
        fn reset_mixed(&self, _repo_path: &Path, _sha: &str) -> Result<(), VcsError> {
            Ok(())
        }
    }

    fn reviewer_options() -> RunnerOptions {
        RunnerOptions {
            model: "claude-sonnet".to_owned(),
            workdir: std::env::temp_dir(),
            timeout: Duration::from_secs(30),
        }
    }

    #[test]
    fn clean_merge_succeeds_without_escalation() {
        let vcs = ScriptedVcs::new(vec![MergeAttempt { clean: true, conflicts: Vec::new() }], true);
        let bus = EventBus::default();
        let mut checkpoints = Vec::new();
        let task = Task::new("add endpoint", TaskType::Feature);
        let agent_id = AgentId::new();
        let options = MergerOptions::new(reviewer_options());

        let result = merge(
            &vcs,
            &bus,
            &mut checkpoints,
            Path::new("/tmp/session"),
            "session",
            "agent/x",
            &task,
            &agent_id,
            &options,
            || AgentRunner::Fixture(FixtureRunner::new(Vec::new())),
        )
        .unwrap();

        assert!(result.success);
        assert_eq!(checkpoints.len(), 1);
        assert_eq!(checkpoints[0].task_id, task.id);
    }

    #[test]
    fn conflicting_non_critical_files_escalate_and_skip_agent_blocks() {
        let vcs = ScriptedVcs::new(
            vec![MergeAttempt { clean: false, conflicts: vec!["src/main.rs".to_owned()] }],
            false,
        );
        let bus = Arc::new(EventBus::default());
        let mut checkpoints = Vec::new();
        let task = Task::new("refactor module", TaskType::Refactor);
        let agent_id = AgentId::new();
        let mut options = MergerOptions::new(reviewer_options());
        options.rebase_retries = 1;

        let rx = bus.subscribe();
        let bus_for_call = bus.clone();

        std::thread::scope(|scope| {
            let handle = scope.spawn(|| {
                merge(
                    &vcs,
                    &bus_for_call,
                    &mut checkpoints,
                    Path::new("/tmp/session"),
                    "session",
                    "agent/x",
                    &task,
                    &agent_id,
                    &options,
                    || AgentRunner::Fixture(FixtureRunner::new(Vec::new())),
                )
            });

            loop {
                let event = rx.recv_timeout(Duration::from_secs(5)).expect("merge conflict event");
                if event.event_type == EventType::MergeConflict {
                    let id = event.metadata["escalation_id"].as_u64().unwrap();
                    bus.respond(id, EscalationResponse { action: "skip_agent".to_owned(), timestamp_ms: 0 });
                    break;
                }
            }

            let result = handle.join().unwrap().unwrap();
            assert!(!result.success);
            assert!(result.error.unwrap().contains("skip_agent"));
        });
    }
}
