//! [`GitVcs`]: the `git`-subprocess implementation of [`crate::Vcs`].

use std::path::Path;
use std::time::Duration;

use crate::process::{VcsError, git};
use crate::types::{Diff, FileSide};
use crate::{MergeAttempt, Vcs, DEFAULT_TIMEOUT};

/// A [`Vcs`] implementation backed by the `git` CLI binary.
#[derive(Clone, Debug)]
pub struct GitVcs {
    timeout: Duration,
}

impl Default for GitVcs {
    fn default() -> Self {
        Self::new(DEFAULT_TIMEOUT)
    }
}

impl GitVcs {
    /// Construct a `GitVcs` with a custom per-command timeout.
    #[must_use]
    pub const fn new(timeout: Duration) -> Self {
        Self { timeout }
    }

    fn run(&self, cwd: &Path, args: &[&str], label: &'static str) -> Result<String, VcsError> {
        git(cwd, args, self.timeout, label)
    }
}

impl Vcs for GitVcs {
    fn create_worktree(&self, path: &Path, branch: &str, base: &str) -> Result<(), VcsError> {
        let path_str = path.to_string_lossy();
        self.run(
            Path::new("."),
            &["worktree", "add", "-b", branch, &path_str, base],
            "worktree add",
        )?;
        Ok(())
    }

    fn remove_worktree(&self, path: &Path) -> Result<(), VcsError> {
        let path_str = path.to_string_lossy();
        self.run(
            Path::new("."),
            &["worktree", "remove", "--force", &path_str],
            "worktree remove",
        )?;
        Ok(())
    }

    fn create_branch(&self, name: &str, base: &str) -> Result<(), VcsError> {
        self.run(Path::new("."), &["branch", name, base], "branch")?;
        Ok(())
    }

    fn delete_branch(&self, name: &str, force: bool) -> Result<(), VcsError> {
        let flag = if force { "-D" } else { "-d" };
        self.run(Path::new("."), &["branch", flag, name], "branch -d")?;
        Ok(())
    }

    fn merge_no_ff(&self, repo_path: &Path, branch: &str) -> Result<MergeAttempt, VcsError> {
        match self.run(
            repo_path,
            &["merge", "--no-ff", "--no-edit", branch],
            "merge",
        ) {
            Ok(_) => Ok(MergeAttempt {
                clean: true,
                conflicts: Vec::new(),
            }),
            Err(VcsError::CommandFailed { .. }) => {
                let conflicts = self.conflicted_paths(repo_path)?;
                Ok(MergeAttempt {
                    clean: conflicts.is_empty(),
                    conflicts,
                })
            }
            Err(other) => Err(other),
        }
    }

    fn abort_merge(&self, repo_path: &Path) -> Result<(), VcsError> {
        self.run(repo_path, &["merge", "--abort"], "merge --abort")?;
        Ok(())
    }

    fn rebase(
        &self,
        repo_path: &Path,
        branch: &str,
        onto: &str,
    ) -> Result<MergeAttempt, VcsError> {
        match self.run(repo_path, &["rebase", "--onto", onto, branch], "rebase") {
            Ok(_) => Ok(MergeAttempt {
                clean: true,
                conflicts: Vec::new(),
            }),
            Err(VcsError::CommandFailed { .. }) => {
                let conflicts = self.conflicted_paths(repo_path)?;
                Ok(MergeAttempt {
                    clean: conflicts.is_empty(),
                    conflicts,
                })
            }
            Err(other) => Err(other),
        }
    }

    fn abort_rebase(&self, repo_path: &Path) -> Result<(), VcsError> {
        self.run(repo_path, &["rebase", "--abort"], "rebase --abort")?;
        Ok(())
    }

    fn conflicted_paths(&self, repo_path: &Path) -> Result<Vec<String>, VcsError> {
        let out = self.run(
            repo_path,
            &["diff", "--name-only", "--diff-filter=U"],
            "diff --diff-filter=U",
        )?;
        Ok(out.lines().map(str::to_owned).filter(|l| !l.is_empty()).collect())
    }

    fn read_at_ref(
        &self,
        repo_path: &Path,
        git_ref: &str,
        path: &str,
    ) -> Result<Vec<u8>, VcsError> {
        let spec = format!("{git_ref}:{path}");
        let out = self.run(repo_path, &["show", &spec], "show")?;
        Ok(out.into_bytes())
    }

    fn diff(&self, repo_path: &Path, a: &str, b: &str) -> Result<Diff, VcsError> {
        let unified = self.run(repo_path, &["diff", a, b], "diff")?;
        let names = self.run(repo_path, &["diff", "--name-only", a, b], "diff --name-only")?;
        let changed_files = names.lines().map(str::to_owned).filter(|l| !l.is_empty()).collect();
        Ok(Diff {
            unified,
            changed_files,
        })
    }

    fn checkout_side(&self, repo_path: &Path, path: &str, side: FileSide) -> Result<(), VcsError> {
        self.run(
            repo_path,
            &["checkout", side.git_flag(), "--", path],
            "checkout --ours/--theirs",
        )?;
        Ok(())
    }

    fn stage(&self, repo_path: &Path, paths: &[String]) -> Result<(), VcsError> {
        if paths.is_empty() {
            self.run(repo_path, &["add", "-A"], "add")?;
        } else {
            let mut args = vec!["add"];
            args.extend(paths.iter().map(String::as_str));
            self.run(repo_path, &args, "add")?;
        }
        Ok(())
    }

    fn commit(&self, repo_path: &Path, message: &str) -> Result<String, VcsError> {
        self.run(repo_path, &["commit", "-m", message], "commit")?;
        let sha = self.run(repo_path, &["rev-parse", "HEAD"], "rev-parse")?;
        Ok(sha.trim().to_owned())
    }

    fn prune_worktrees(&self, repo_path: &Path) -> Result<(), VcsError> {
        self.run(repo_path, &["worktree", "prune"], "worktree prune")?;
        Ok(())
    }

    fn resolve_ref(&self, repo_path: &Path, git_ref: &str) -> Result<String, VcsError> {
        let out = self.run(repo_path, &["rev-parse", git_ref], "rev-parse")?;
        Ok(out.trim().to_owned())
    }

    fn reset_hard(&self, repo_path: &Path, sha: &str) -> Result<(), VcsError> {
        self.run(repo_path, &["reset", "--hard", sha], "reset --hard")?;
        Ok(())
    }

    fn reset_mixed(&self, repo_path: &Path, sha: &str) -> Result<(), VcsError> {
        self.run(repo_path, &["reset", "--mixed", sha], "reset --mixed")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::process::Command;

    fn init_repo() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        let run = |args: &[&str]| {
            Command::new("git")
                .args(args)
                .current_dir(dir.path())
                .status()
                .unwrap();
        };
        run(&["init", "-q", "-b", "main"]);
        run(&["config", "user.email", "test@example.com"]);
        run(&["config", "user.name", "test"]);
        std::fs::write(dir.path().join("README.md"), "hello\n").unwrap();
        run(&["add", "-A"]);
        run(&["commit", "-q", "-m", "init"]);
        dir
    }

    #[test]
    fn resolve_ref_finds_head() {
        let repo = init_repo();
        let vcs = GitVcs::default();
        let sha = vcs.resolve_ref(repo.path(), "HEAD").unwrap();
        assert_eq!(sha.len(), 40);
    }

    #[test]
    fn create_and_remove_worktree_roundtrip() {
        let repo = init_repo();
        let vcs = GitVcs::default();
        vcs.create_branch("agent-1", "main").unwrap();
        let wt_path = repo.path().join("..").join("wt-agent-1");
        // Re-run from inside the repo so "." resolves correctly.
        std::env::set_current_dir(repo.path()).unwrap();
        vcs.create_worktree(&wt_path, "agent-1-wt", "agent-1")
            .unwrap();
        assert!(wt_path.join("README.md").exists());
        vcs.remove_worktree(&wt_path).unwrap();
        assert!(!wt_path.exists());
    }

    #[test]
    fn conflicted_paths_empty_on_clean_repo() {
        let repo = init_repo();
        let vcs = GitVcs::default();
        let conflicts = vcs.conflicted_paths(repo.path()).unwrap();
        assert!(conflicts.is_empty());
    }
}
