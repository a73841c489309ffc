//! `alphie cleanup [--force|--dry-run|--sessions]` (§6): reconcile and
//! remove orphaned worktrees left behind by a crashed or interrupted
//! session.

use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use alphie_engine::isolation::IsolationManager;
use alphie_vcs::GitVcs;
use anyhow::Result;
use clap::Args;

use crate::cli_config;

/// Flags for `alphie cleanup`.
#[derive(Args)]
pub struct CleanupArgs {
    /// Remove orphans without prompting.
    #[arg(long)]
    pub force: bool,
    /// List what would be removed without removing it.
    #[arg(long, conflicts_with = "force")]
    pub dry_run: bool,
    /// List active session branches instead of worktrees.
    #[arg(long)]
    pub sessions: bool,
}

/// Run the `cleanup` subcommand against `project_root`.
///
/// # Errors
/// Returns an error if the session root cannot be read.
pub fn run(project_root: &Path, args: &CleanupArgs) -> Result<()> {
    let vcs = GitVcs::new(Duration::from_secs(120));
    let session_root = cli_config::session_dir(project_root).join("worktrees");
    let isolation = IsolationManager::new(vcs, session_root, String::new(), false);

    if args.sessions {
        for (agent_id, worktree) in isolation.live_worktrees() {
            println!("{agent_id}: {} ({})", worktree.path.display(), worktree.branch);
        }
        return Ok(());
    }

    let orphans = isolation.list_orphans(&HashSet::new());
    if orphans.is_empty() {
        println!("no orphaned worktrees");
        return Ok(());
    }

    if args.dry_run {
        for path in &orphans {
            println!("would remove {}", path.display());
        }
        return Ok(());
    }

    if !args.force {
        println!("{} orphaned worktree(s) found; pass --force to remove", orphans.len());
        return Ok(());
    }

    let mut removed = 0_u32;
    isolation.cleanup_orphans(&HashSet::new(), |path| {
        println!("removed {}", path.display());
        removed += 1;
    });
    println!("removed {removed} orphaned worktree(s)");
    Ok(())
}
