//! `alphie`: the CLI front end for the parallel agent orchestrator engine.
//!
//! Dispatches each subcommand to a thin wiring module that constructs the
//! engine's VCS, runner, and isolation handles and calls straight into
//! `alphie-engine`. Exit codes follow §6: `0` success, `1` user/runtime
//! error, `2` usage error (handled by clap itself).

mod audit_cmd;
mod baseline_cmd;
mod cleanup_cmd;
mod cli_config;
mod config_cmd;
mod init_cmd;
mod learn_cmd;
mod run_cmd;
mod runner_factory;
mod status_cmd;

use std::path::PathBuf;

use alphie_engine::scheduler::tiers::Tier;
use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};

/// alphie: spec-driven parallel agent orchestration.
#[derive(Parser)]
#[command(name = "alphie")]
#[command(version, about)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Tier selection for the CLI surface (§4.9, §6). Mirrors the engine's
/// `Tier` but derives `ValueEnum` so it can be used directly as a `clap`
/// argument; the engine crate deliberately carries no `clap` dependency.
#[derive(Clone, Copy, Debug, ValueEnum)]
enum TierArg {
    Quick,
    Scout,
    Builder,
    Architect,
}

impl From<TierArg> for Tier {
    fn from(arg: TierArg) -> Self {
        match arg {
            TierArg::Quick => Self::Quick,
            TierArg::Scout => Self::Scout,
            TierArg::Builder => Self::Builder,
            TierArg::Architect => Self::Architect,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Run a single free-form task against the current repository.
    Run {
        /// Natural-language description of the task.
        task: String,
        /// Tier preset (overridden by --quick/--single/--parallel).
        #[arg(long)]
        tier: Option<TierArg>,
        /// Merge directly to the current branch, skipping session-branch
        /// indirection.
        #[arg(long)]
        greenfield: bool,
        /// Suppress interactive escalation prompts (answer nothing, let
        /// tasks block instead).
        #[arg(long)]
        headless: bool,
        /// Treat this task as part of a larger epic (reserved for future
        /// cross-session grouping; currently a no-op hint).
        #[arg(long)]
        epic: bool,
        /// Shorthand for `--tier quick`.
        #[arg(long, conflicts_with_all = ["parallel", "single", "tier"])]
        quick: bool,
        /// Shorthand for `--tier builder`.
        #[arg(long, conflicts_with_all = ["quick", "single", "tier"])]
        parallel: bool,
        /// Shorthand for `--tier scout`.
        #[arg(long, conflicts_with_all = ["quick", "parallel", "tier"])]
        single: bool,
        /// Invoke the configured CLI binary instead of the API backend.
        #[arg(long)]
        passthrough: bool,
        /// Path to an external agent CLI binary (implies --passthrough).
        #[arg(long)]
        cli: Option<String>,
    },

    /// Run the Architect Loop against a whole specification document.
    Implement {
        /// Path to the specification file.
        spec_file: PathBuf,
        /// Path to an external agent CLI binary, instead of the API backend.
        #[arg(long)]
        cli: Option<String>,
    },

    /// Audit a repository against an architecture document, without
    /// decomposing or running any tasks.
    Audit {
        /// Path to the architecture document.
        arch_doc: PathBuf,
        /// Print the audit report as JSON.
        #[arg(long)]
        json: bool,
    },

    /// Initialize `.alphie/` in a directory (defaults to the current one).
    Init {
        /// Directory to initialize.
        dir: Option<PathBuf>,
    },

    /// Remove orphaned worktrees left by a crashed or interrupted session.
    Cleanup(cleanup_cmd::CleanupArgs),

    /// Summarize the current session's live worktrees and baseline.
    Status,

    /// Inspect or edit the preexisting failing-test baseline.
    #[command(subcommand)]
    Baseline(baseline_cmd::BaselineCommands),

    /// Get or set a project config key.
    Config {
        /// Dotted config key, e.g. `execution.max_agents`.
        key: Option<String>,
        /// New value to set at `key`.
        value: Option<String>,
    },

    /// Capture or recall cross-session Context/Action/Outcome learnings.
    #[command(subcommand)]
    Learn(learn_cmd::LearnCommands),

    /// Print the installed version.
    Version,
}

fn main() {
    let cli = Cli::parse();
    if let Err(err) = dispatch(cli.command) {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}

#[allow(clippy::too_many_lines)]
fn dispatch(command: Commands) -> Result<()> {
    let project_root = std::env::current_dir()?;

    match command {
        Commands::Run {
            task,
            tier,
            greenfield,
            headless: _,
            epic: _,
            quick,
            parallel,
            single,
            passthrough: _,
            cli,
        } => {
            let config = cli_config::load_config(&project_root)?;
            let runner = runner_factory::resolve(&config, cli)?;
            let flags = run_cmd::RunFlags {
                tier: tier.map(Into::into),
                greenfield,
                quick,
                parallel,
                single,
            };
            run_cmd::run_task(&project_root, &task, &flags, &config, &runner)
        }

        Commands::Implement { spec_file, cli } => {
            let config = cli_config::load_config(&project_root)?;
            let runner = runner_factory::resolve(&config, cli)?;
            run_cmd::implement(&project_root, &spec_file, &config, &runner)
        }

        Commands::Audit { arch_doc, json } => {
            let config = cli_config::load_config(&project_root)?;
            let runner = runner_factory::resolve(&config, None)?;
            audit_cmd::run(&arch_doc, &config.execution.model, json, &runner)
        }

        Commands::Init { dir } => init_cmd::run(dir),

        Commands::Cleanup(args) => cleanup_cmd::run(&project_root, &args),

        Commands::Status => status_cmd::run(&project_root),

        Commands::Baseline(command) => baseline_cmd::run(&project_root, command),

        Commands::Config { key, value } => config_cmd::run(&project_root, key, value),

        Commands::Learn(command) => learn_cmd::run(&project_root, command),

        Commands::Version => {
            println!("alphie {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
