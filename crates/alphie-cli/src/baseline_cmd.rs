//! `alphie baseline {show|capture|reset}` (§6): the preexisting failing-test
//! set tolerated by the build/test validation layer.

use std::collections::BTreeSet;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};

use alphie_engine::validator::Baseline;
use anyhow::{Context, Result};
use clap::Subcommand;
use fs4::fs_std::FileExt as _;
use serde::{Deserialize, Serialize};

use crate::cli_config;

#[derive(Subcommand)]
pub enum BaselineCommands {
    /// Print the currently captured baseline.
    Show,
    /// Run the project's test command and capture its failing tests as the
    /// new baseline.
    Capture {
        /// Test command to run, e.g. `"cargo test"`.
        #[arg(long, default_value = "cargo test")]
        command: String,
    },
    /// Discard the captured baseline (an empty baseline tolerates nothing).
    Reset,
}

#[derive(Serialize, Deserialize, Default)]
struct PersistedBaseline {
    failing_tests: BTreeSet<String>,
}

fn baseline_path(project_root: &Path) -> PathBuf {
    cli_config::session_dir(project_root).join("baseline.json")
}

/// Load a baseline from `path`, or an empty baseline if it does not exist.
/// Exposed for `alphie status`'s summary.
///
/// # Errors
/// Returns an error if the file exists but cannot be read or parsed.
pub fn load_for_status(path: &Path) -> Result<Baseline> {
    load(path)
}

fn load(path: &Path) -> Result<Baseline> {
    let Ok(file) = OpenOptions::new().read(true).open(path) else {
        return Ok(Baseline::empty());
    };
    file.lock_shared().context("locking baseline.json for read")?;
    let persisted: PersistedBaseline =
        serde_json::from_reader(&file).context("parsing baseline.json")?;
    file.unlock().ok();
    Ok(Baseline::from_failing_tests(persisted.failing_tests.into_iter().collect()))
}

fn save(path: &Path, baseline: &Baseline) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = OpenOptions::new().write(true).create(true).truncate(true).open(path)?;
    file.lock_exclusive().context("locking baseline.json for write")?;
    let persisted = PersistedBaseline {
        failing_tests: baseline.failing_tests().iter().cloned().collect(),
    };
    serde_json::to_writer_pretty(&file, &persisted).context("writing baseline.json")?;
    file.unlock().ok();
    Ok(())
}

/// Run one `baseline` subcommand against `project_root`.
///
/// # Errors
/// Returns an error if the baseline file cannot be read/written, or (for
/// `capture`) if the test command cannot be spawned.
pub fn run(project_root: &Path, command: BaselineCommands) -> Result<()> {
    let path = baseline_path(project_root);
    match command {
        BaselineCommands::Show => {
            let baseline = load(&path)?;
            let mut names: Vec<&String> = baseline.failing_tests().iter().collect();
            names.sort();
            if names.is_empty() {
                println!("no failing tests in baseline");
            }
            for name in names {
                println!("{name}");
            }
        }
        BaselineCommands::Capture { command } => {
            let mut parts = command.split_whitespace();
            let program = parts.next().context("empty test command")?;
            let output = std::process::Command::new(program)
                .args(parts)
                .current_dir(project_root)
                .output()
                .with_context(|| format!("running baseline capture command '{command}'"))?;
            let combined =
                format!("{}\n{}", String::from_utf8_lossy(&output.stdout), String::from_utf8_lossy(&output.stderr));
            let baseline = Baseline::capture(&combined);
            save(&path, &baseline)?;
            println!("captured {} failing test(s) into baseline", baseline.failing_tests().len());
        }
        BaselineCommands::Reset => {
            save(&path, &Baseline::empty())?;
            println!("baseline reset");
        }
    }
    Ok(())
}
