//! Value types returned by [`crate::Vcs`] operations.

use serde::{Deserialize, Serialize};

/// The result of `diff(a, b)` (§4.1): a unified text blob plus the changed
/// files that produced it.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Diff {
    /// Unified diff text.
    pub unified: String,
    /// Paths changed between `a` and `b`.
    pub changed_files: Vec<String>,
}

/// One conflicted path, with the kind of conflict if git reported one.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictEntry {
    /// Path relative to the repository root.
    pub path: String,
    /// git's description of the conflict, e.g. `"both modified"`.
    pub description: String,
}

/// Which side of a conflict to resolve a path to (§4.1 checkout ours/theirs).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FileSide {
    /// The base/session side.
    Ours,
    /// The incoming/agent side.
    Theirs,
}

impl FileSide {
    pub(crate) const fn git_flag(self) -> &'static str {
        match self {
            Self::Ours => "--ours",
            Self::Theirs => "--theirs",
        }
    }
}
