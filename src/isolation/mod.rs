//! The Worktree/Isolation Manager (C5, §4.5).

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use alphie_vcs::Vcs;

use crate::error::EngineError;
use crate::model::agent::AgentId;
use crate::model::worktree::{derive_path, Worktree};

/// Maintains the live-worktree map for one session (§4.5, §5 "Worktrees:
/// single-owner, enforced by the Isolation Manager").
///
/// Generic over the `Vcs` implementation so tests can swap in a fixture
/// that doesn't shell out to `git`.
pub struct IsolationManager<V> {
    vcs: V,
    session_root: PathBuf,
    session_branch: String,
    greenfield: bool,
    live: Mutex<HashMap<AgentId, Worktree>>,
    orphans: Mutex<Vec<PathBuf>>,
}

impl<V: Vcs> IsolationManager<V> {
    /// Build a manager rooted at `session_root`, merging onto
    /// `session_branch` (or the main branch directly, when `greenfield`).
    #[must_use]
    pub fn new(vcs: V, session_root: PathBuf, session_branch: String, greenfield: bool) -> Self {
        Self {
            vcs,
            session_root,
            session_branch,
            greenfield,
            live: Mutex::new(HashMap::new()),
            orphans: Mutex::new(Vec::new()),
        }
    }

    /// Allocate a worktree for `agent_id`, on a fresh branch parented at the
    /// session branch (or main, in greenfield mode).
    ///
    /// # Errors
    /// Returns `EngineError::VcsError` if branch or worktree creation fails.
    pub fn allocate(&self, agent_id: &AgentId) -> Result<Worktree, EngineError> {
        let path = derive_path(&self.session_root, agent_id);
        let branch = agent_branch_name(agent_id);
        let base = if self.greenfield { "main" } else { self.session_branch.as_str() };

        self.vcs.create_worktree(&path, &branch, base)?;

        let worktree = Worktree::new(path, branch);
        let mut live = self.live.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        live.insert(agent_id.clone(), worktree.clone());
        Ok(worktree)
    }

    /// Release `agent_id`'s worktree. On removal failure, the path is
    /// recorded as an orphan rather than propagating the error — a stuck
    /// worktree should not fail the whole session.
    pub fn release(&self, agent_id: &AgentId) {
        let worktree = {
            let mut live = self.live.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            live.remove(agent_id)
        };
        let Some(worktree) = worktree else { return };
        if self.vcs.remove_worktree(&worktree.path).is_err() {
            let mut orphans = self.orphans.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            orphans.push(worktree.path);
        }
    }

    /// Currently live worktrees, keyed by agent.
    #[must_use]
    pub fn live_worktrees(&self) -> HashMap<AgentId, Worktree> {
        self.live.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Enumerate worktree directories under the session root that do not
    /// belong to `active_agent_ids`, using the `agent-<id>` naming
    /// convention so identification needs no external state.
    #[must_use]
    pub fn list_orphans(&self, active_agent_ids: &std::collections::HashSet<AgentId>) -> Vec<PathBuf> {
        let mut found = self.orphans.lock().unwrap_or_else(std::sync::PoisonError::into_inner).clone();
        let Ok(entries) = std::fs::read_dir(&self.session_root) else {
            return found;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else { continue };
            let Some(id_str) = name.strip_prefix("agent-") else { continue };
            if !active_agent_ids.iter().any(|id| id.to_string() == id_str) && !found.contains(&path) {
                found.push(path);
            }
        }
        found
    }

    /// Remove every orphan, invoking `callback` once per path actually
    /// removed. Individual removal errors are ignored — cleanup continues.
    pub fn cleanup_orphans(
        &self,
        active_agent_ids: &std::collections::HashSet<AgentId>,
        mut callback: impl FnMut(&Path),
    ) {
        let orphans = self.list_orphans(active_agent_ids);
        for path in &orphans {
            if self.vcs.remove_worktree(path).is_ok() {
                callback(path);
            }
        }
        let mut tracked = self.orphans.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        tracked.retain(|p| !orphans.contains(p));
        let _ = self.vcs.prune_worktrees(Path::new("."));
    }

    /// Cross-reference `known_agent_ids` (from persisted task records)
    /// against on-disk worktrees; report agent ids with no worktree and
    /// worktrees with no matching agent id.
    #[must_use]
    pub fn reconcile(&self, known_agent_ids: &[AgentId]) -> ReconcileReport {
        let live = self.live_worktrees();
        let missing_worktree = known_agent_ids
            .iter()
            .filter(|id| !live.contains_key(id))
            .cloned()
            .collect();
        let known: std::collections::HashSet<AgentId> = known_agent_ids.iter().cloned().collect();
        let unexpected_worktree = live.keys().filter(|id| !known.contains(id)).cloned().collect();
        ReconcileReport {
            missing_worktree,
            unexpected_worktree,
        }
    }
}

fn agent_branch_name(agent_id: &AgentId) -> String {
    format!("agent/{agent_id}")
}

/// Mismatches found by [`IsolationManager::reconcile`].
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Agent ids with a persisted task record but no live worktree.
    pub missing_worktree: Vec<AgentId>,
    /// Live worktrees with no corresponding persisted agent id.
    pub unexpected_worktree: Vec<AgentId>,
}

impl ReconcileReport {
    /// Whether no mismatches were found.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.missing_worktree.is_empty() && self.unexpected_worktree.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default, Clone)]
    struct FakeVcs {
        fail_remove: Arc<std::sync::atomic::AtomicBool>,
    }

    impl Vcs for FakeVcs {
        fn create_worktree(&self, _path: &Path, _branch: &str, _base: &str) -> Result<(), alphie_vcs::VcsError> {
            Ok(())
        }
        fn remove_worktree(&self, _path: &Path) -> Result<(), alphie_vcs::VcsError> {
            if self.fail_remove.load(Ordering::SeqCst) {
                Err(alphie_vcs::VcsError::CommandFailed {
                    subcommand: "worktree remove",
                    exit_code: Some(1),
                    stderr: "locked".to_owned(),
                })
            } else {
                Ok(())
            }
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
            Ok(alphie_vcs::Diff::default())
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

    #[test]
    fn allocate_then_release_clears_live_map() {
        let manager = IsolationManager::new(FakeVcs::default(), PathBuf::from("/tmp/session"), "session".to_owned(), false);
        let agent = AgentId::new();
        let wt = manager.allocate(&agent).unwrap();
        assert!(wt.has_absolute_path());
        assert_eq!(manager.live_worktrees().len(), 1);
        manager.release(&agent);
        assert!(manager.live_worktrees().is_empty());
    }

    #[test]
    fn release_failure_records_orphan() {
        let vcs = FakeVcs::default();
        vcs.fail_remove.store(true, Ordering::SeqCst);
        let manager = IsolationManager::new(vcs, PathBuf::from("/tmp/session"), "session".to_owned(), false);
        let agent = AgentId::new();
        manager.allocate(&agent).unwrap();
        manager.release(&agent);
        let active = std::collections::HashSet::new();
        assert_eq!(manager.list_orphans(&active).len(), 1);
    }

    #[test]
    fn reconcile_detects_missing_and_unexpected() {
        let manager = IsolationManager::new(FakeVcs::default(), PathBuf::from("/tmp/session"), "session".to_owned(), false);
        let live_agent = AgentId::new();
        manager.allocate(&live_agent).unwrap();
        let missing_agent = AgentId::new();
        let report = manager.reconcile(&[missing_agent.clone()]);
        assert_eq!(report.missing_worktree, vec![missing_agent]);
        assert_eq!(report.unexpected_worktree, vec![live_agent]);
    }

    #[test]
    fn cleanup_orphans_invokes_callback_per_removed_path() {
        let vcs = FakeVcs::default();
        vcs.fail_remove.store(true, Ordering::SeqCst);
        let manager = IsolationManager::new(vcs.clone(), PathBuf::from("/tmp/session"), "session".to_owned(), false);
        let agent = AgentId::new();
        manager.allocate(&agent).unwrap();
        manager.release(&agent); // fails to remove -> orphaned

        vcs.fail_remove.store(false, Ordering::SeqCst);
        let calls = Arc::new(AtomicUsize::new(0));
        let calls2 = calls.clone();
        manager.cleanup_orphans(&std::collections::HashSet::new(), move |_| {
            calls2.fetch_add(1, Ordering::SeqCst);
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(manager.list_orphans(&std::collections::HashSet::new()).is_empty());
    }

    /// Worktree exclusivity (§3, §8 invariant 3): allocating concurrently
    /// from many threads against a real `tempfile`-backed session root must
    /// never hand two agents the same path, and the live map must end up
    /// with exactly one entry per agent — no update lost to the `Mutex`.
    #[test]
    fn concurrent_allocate_never_collides_and_loses_no_update() {
        let session_root = tempfile::tempdir().unwrap();
        let manager = IsolationManager::new(
            FakeVcs::default(),
            session_root.path().to_path_buf(),
            "session".to_owned(),
            false,
        );
        let agents: Vec<AgentId> = (0..16).map(|_| AgentId::new()).collect();

        let paths = std::thread::scope(|scope| {
            let handles: Vec<_> = agents
                .iter()
                .map(|agent| scope.spawn(|| manager.allocate(agent).unwrap()))
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect::<Vec<_>>()
        });

        let unique_paths: std::collections::HashSet<_> = paths.iter().map(|w| w.path.clone()).collect();
        assert_eq!(unique_paths.len(), agents.len(), "two agents were handed the same worktree path");
        assert_eq!(manager.live_worktrees().len(), agents.len());
    }
}
