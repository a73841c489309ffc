//! Resolve the engine's config layers, XDG paths, and persistent session
//! layout (§6) on behalf of every subcommand.

use std::path::{Path, PathBuf};

use alphie_engine::config::EngineConfig;
use anyhow::{Context, Result};

/// `~/.config/alphie/config.yaml` (or `$XDG_CONFIG_HOME/alphie/config.yaml`).
#[must_use]
pub fn user_config_path() -> PathBuf {
    xdg_dir("XDG_CONFIG_HOME", ".config").join("alphie").join("config.yaml")
}

/// `.alphie.yaml` in the project root.
#[must_use]
pub fn project_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".alphie.yaml")
}

/// The `.alphie/` persisted-layout root for `project_root` (§6).
#[must_use]
pub fn session_dir(project_root: &Path) -> PathBuf {
    project_root.join(".alphie")
}

fn xdg_dir(env_var: &str, fallback_under_home: &str) -> PathBuf {
    std::env::var(env_var).map(PathBuf::from).unwrap_or_else(|_| {
        let home = std::env::var("HOME").unwrap_or_else(|_| ".".to_owned());
        Path::new(&home).join(fallback_under_home)
    })
}

/// Load the layered `EngineConfig` for `project_root`, resolving both the
/// user and project config files.
///
/// # Errors
/// Returns an error if either config layer fails to parse.
pub fn load_config(project_root: &Path) -> Result<EngineConfig> {
    EngineConfig::load_layered(&user_config_path(), &project_config_path(project_root))
        .context("loading engine configuration")
}

/// Ensure the `.alphie/` persisted layout exists under `project_root` (§6).
///
/// # Errors
/// Returns an error if any directory cannot be created.
pub fn ensure_session_layout(project_root: &Path) -> Result<PathBuf> {
    let root = session_dir(project_root);
    std::fs::create_dir_all(root.join("logs")).context("creating .alphie/logs")?;
    std::fs::create_dir_all(root.join("signals")).context("creating .alphie/signals")?;
    std::fs::create_dir_all(root.join("agents")).context("creating .alphie/agents")?;
    Ok(root)
}
