//! Version-control capability for the engine (§4.1).
//!
//! `alphie-vcs` is the single interface through which the engine talks to a
//! branching VCS. No other crate should shell out to `git` directly — every
//! worktree, branch, merge, or diff operation goes through [`Vcs`].
//!
//! The adapter wraps the `git` binary via subprocess invocation rather than
//! a git-object library: every operation here is a small, well-understood
//! porcelain command, and shelling out keeps the adapter's behavior
//! identical to what a human running `git` at a shell would see. Process
//! abstractions (exit codes, stderr) never leak past this crate's boundary
//! — every method returns [`VcsError`] or a typed success value.

mod process;
mod repo;
mod types;

pub use process::VcsError;
pub use repo::GitVcs;
pub use types::{ConflictEntry, Diff, FileSide};

use std::path::Path;
use std::time::Duration;

/// Thin capability layer over a branching version-control system (§4.1).
///
/// Conflict is **not** a failure: `merge_no_ff` and `rebase` return
/// `Ok(MergeAttempt)` with a populated `conflicts` list rather than an `Err`
/// when the merge stops on conflict markers. Only environment-level failure
/// (git missing, repo corrupt, I/O error) is an `Err`.
pub trait Vcs {
    /// Create a worktree at `path` on a new `branch`, parented at `base`.
    fn create_worktree(&self, path: &Path, branch: &str, base: &str) -> Result<(), VcsError>;

    /// Remove a worktree at `path`. Also prunes stale worktree metadata.
    fn remove_worktree(&self, path: &Path) -> Result<(), VcsError>;

    /// Create a branch named `name` at `base` without checking it out.
    fn create_branch(&self, name: &str, base: &str) -> Result<(), VcsError>;

    /// Delete a branch. `force` allows deleting an unmerged branch.
    fn delete_branch(&self, name: &str, force: bool) -> Result<(), VcsError>;

    /// Merge `branch` into the branch currently checked out at `repo_path`,
    /// with `--no-ff` so a merge commit is always created on success.
    fn merge_no_ff(&self, repo_path: &Path, branch: &str) -> Result<MergeAttempt, VcsError>;

    /// Abort an in-progress merge at `repo_path`.
    fn abort_merge(&self, repo_path: &Path) -> Result<(), VcsError>;

    /// Rebase `branch` onto `onto`, operating in a worktree at `repo_path`.
    fn rebase(&self, repo_path: &Path, branch: &str, onto: &str) -> Result<MergeAttempt, VcsError>;

    /// Abort an in-progress rebase at `repo_path`.
    fn abort_rebase(&self, repo_path: &Path) -> Result<(), VcsError>;

    /// List paths with unresolved conflict markers in the index at `repo_path`.
    fn conflicted_paths(&self, repo_path: &Path) -> Result<Vec<String>, VcsError>;

    /// Read `path`'s content as it exists at `git_ref`.
    fn read_at_ref(&self, repo_path: &Path, git_ref: &str, path: &str)
    -> Result<Vec<u8>, VcsError>;

    /// Compute `diff(a, b)` as both a unified text blob and a changed-file list.
    fn diff(&self, repo_path: &Path, a: &str, b: &str) -> Result<Diff, VcsError>;

    /// Resolve a conflicted `path` to one side ("ours" or "theirs").
    fn checkout_side(&self, repo_path: &Path, path: &str, side: FileSide) -> Result<(), VcsError>;

    /// Stage `paths` (or all changes if `paths` is empty).
    fn stage(&self, repo_path: &Path, paths: &[String]) -> Result<(), VcsError>;

    /// Commit staged changes with `message`. Returns the new commit sha.
    fn commit(&self, repo_path: &Path, message: &str) -> Result<String, VcsError>;

    /// Remove stale worktree administrative files.
    fn prune_worktrees(&self, repo_path: &Path) -> Result<(), VcsError>;

    /// The current commit sha that `git_ref` resolves to.
    fn resolve_ref(&self, repo_path: &Path, git_ref: &str) -> Result<String, VcsError>;

    /// Hard-reset the branch checked out at `repo_path` to `sha`.
    fn reset_hard(&self, repo_path: &Path, sha: &str) -> Result<(), VcsError>;

    /// Mixed-reset (keep working tree, move `HEAD`/index) to `sha`.
    fn reset_mixed(&self, repo_path: &Path, sha: &str) -> Result<(), VcsError>;
}

/// The outcome of a merge or rebase attempt (§4.1, §4.8).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct MergeAttempt {
    /// `true` if the operation landed cleanly (no conflict markers left).
    pub clean: bool,
    /// Paths left with conflict markers, when `clean` is `false`.
    pub conflicts: Vec<String>,
}

/// Default timeout applied to every subprocess invocation issued through
/// this crate when the caller does not supply one explicitly (§5).
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(120);
