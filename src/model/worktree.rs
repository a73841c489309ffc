//! The [`Worktree`] record (§3, §4.5): a filesystem path + branch pair
//! representing one agent's isolated checkout.

use std::path::{Path, PathBuf};

/// An isolated checkout: a path on disk paired with the branch checked out
/// there.
///
/// Owned by exactly one [`Agent`](super::agent::Agent) while live. The
/// Isolation Manager (§4.5) is the only component that creates, tracks, or
/// removes these.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Worktree {
    /// Absolute path to the checkout root.
    pub path: PathBuf,
    /// The branch checked out at `path`.
    pub branch: String,
}

impl Worktree {
    /// Construct a new worktree record. `path` is not validated to exist —
    /// that is the Isolation Manager's job at allocation time.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>, branch: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            branch: branch.into(),
        }
    }

    /// Whether `path` is an absolute path, as required by §4.5's invariant.
    #[must_use]
    pub fn has_absolute_path(&self) -> bool {
        self.path.is_absolute()
    }
}

/// Derive the deterministic per-agent worktree path under a session root
/// (§4.5 Allocate).
#[must_use]
pub fn derive_path(session_root: &Path, agent_id: &super::agent::AgentId) -> PathBuf {
    session_root.join(format!("agent-{agent_id}"))
}
