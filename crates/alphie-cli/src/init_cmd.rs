//! `alphie init [dir]` (§6): bootstrap the `.alphie/` persisted layout and a
//! default project config.

use std::path::PathBuf;

use anyhow::{Context, Result};

use crate::cli_config;

/// Initialize `dir` (defaulting to the current directory) for use with
/// alphie. Safe to run multiple times.
///
/// # Errors
/// Returns an error if the `.alphie/` directory tree or the default project
/// config cannot be created.
pub fn run(dir: Option<PathBuf>) -> Result<()> {
    let root = dir.unwrap_or(std::env::current_dir()?);
    let session_root = cli_config::ensure_session_layout(&root)?;

    let project_config = cli_config::project_config_path(&root);
    if !project_config.exists() {
        std::fs::write(&project_config, DEFAULT_PROJECT_CONFIG).with_context(|| {
            format!("writing default config to {}", project_config.display())
        })?;
    }

    println!("initialized {}", session_root.display());
    Ok(())
}

const DEFAULT_PROJECT_CONFIG: &str = "# alphie project configuration (see `alphie config`)\n\
branch:\n  greenfield: false\n\
quality_gates:\n  test: true\n  build: true\n  lint: false\n  typecheck: false\n";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn init_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        run(Some(dir.path().to_owned())).unwrap();
        run(Some(dir.path().to_owned())).unwrap();
        assert!(cli_config::session_dir(dir.path()).join("agents").is_dir());
        assert!(cli_config::project_config_path(dir.path()).exists());
    }
}
