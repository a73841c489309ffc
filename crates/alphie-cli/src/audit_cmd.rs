//! `alphie audit <arch-doc>` (§6): run the Auditor stage on its own, without
//! decomposing or draining any gaps.

use std::path::Path;
use std::time::Duration;

use alphie_engine::architect;
use anyhow::{Context, Result};

use crate::runner_factory::{self, RunnerSpec};

/// Run the `audit` subcommand against `arch_doc`.
///
/// # Errors
/// Returns an error if the spec file cannot be read or the auditor agent
/// never produces parseable output.
pub fn run(arch_doc: &Path, model: &str, json: bool, runner: &RunnerSpec) -> Result<()> {
    let spec = architect::parse_spec(arch_doc).context("reading architecture document")?;
    let options = runner_factory::runner_options(model, std::env::current_dir()?, Duration::from_secs(300));
    let mut agent = runner.make();
    let report = architect::audit(&mut agent, &spec, options)?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("completion: {:.0}%", report.completion_ratio() * 100.0);
        for (feature, status) in &report.statuses {
            println!("  {feature}: {status:?}");
        }
        if report.gaps.is_empty() {
            println!("no gaps");
        } else {
            println!("gaps:");
            for gap in &report.gaps {
                println!("  - {} ({})", gap.description, gap.feature_id);
            }
        }
    }

    if !report.is_complete() {
        std::process::exit(1);
    }
    Ok(())
}
