//! The [`MergeResult`] record (§3, §4.8), produced by the Merger and
//! consumed by the Scheduler and Event Bus.

use serde::{Deserialize, Serialize};

/// The outcome of one Merger attempt on an agent branch (§3, §4.8).
///
/// Conflict is not itself a failure — `success` is `false` only once the
/// entire strategy ladder has been exhausted without escalation resolving
/// it; a mid-ladder conflict that a later rung resolves never surfaces here.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct MergeResult {
    /// Whether the merge ultimately succeeded (landed a commit on the
    /// session branch).
    pub success: bool,
    /// Paths still conflicted. Non-empty only when `success` is `false` or
    /// when structured/semantic merge had to intervene.
    pub conflict_files: Vec<String>,
    /// Paths touched by the merge commit.
    pub changed_files: Vec<String>,
    /// Unified diff of the merge commit against the prior session-branch tip.
    pub unified_diff: String,
    /// Set when the plain/structured passes couldn't resolve every
    /// conflict and a semantic-merge agent had to be invoked.
    pub needs_semantic_merge: bool,
    /// Present when `success` is `false`: why the ladder was exhausted.
    pub error: Option<String>,
}

impl MergeResult {
    /// A clean, conflict-free success.
    #[must_use]
    pub fn clean(changed_files: Vec<String>, unified_diff: String) -> Self {
        Self {
            success: true,
            conflict_files: Vec::new(),
            changed_files,
            unified_diff,
            needs_semantic_merge: false,
            error: None,
        }
    }

    /// A terminal failure after exhausting the strategy ladder.
    #[must_use]
    pub fn failed(conflict_files: Vec<String>, error: impl Into<String>) -> Self {
        Self {
            success: false,
            conflict_files,
            changed_files: Vec::new(),
            unified_diff: String::new(),
            needs_semantic_merge: false,
            error: Some(error.into()),
        }
    }
}
