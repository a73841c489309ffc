//! `alphie status` (§6): summarize the current session's live worktrees and
//! captured baseline.

use std::path::Path;
use std::time::Duration;

use alphie_engine::isolation::IsolationManager;
use alphie_vcs::GitVcs;
use anyhow::Result;

use crate::{baseline_cmd, cli_config};

/// Print a summary of the session state under `project_root`.
///
/// # Errors
/// Returns an error if the baseline file exists but cannot be parsed.
pub fn run(project_root: &Path) -> Result<()> {
    let session_root = cli_config::session_dir(project_root);
    if !session_root.is_dir() {
        println!("not initialized (run `alphie init`)");
        return Ok(());
    }

    let vcs = GitVcs::new(Duration::from_secs(120));
    let isolation = IsolationManager::new(vcs, session_root.join("worktrees"), String::new(), false);
    let live = isolation.live_worktrees();
    if live.is_empty() {
        println!("no active agents");
    } else {
        println!("{} active agent(s):", live.len());
        for (agent_id, worktree) in &live {
            println!("  {agent_id}: {} ({})", worktree.path.display(), worktree.branch);
        }
    }

    let baseline = baseline_cmd::load_for_status(&session_root.join("baseline.json"))?;
    println!("baseline: {} tolerated failure(s)", baseline.failing_tests().len());

    Ok(())
}
