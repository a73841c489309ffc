//! `alphie run <task>` and `alphie implement <spec-file>` (§6): the two
//! entry points that actually drive agents against a repository.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use alphie_engine::architect::{self, ArchitectOptions};
use alphie_engine::config::EngineConfig;
use alphie_engine::eventbus::EventBus;
use alphie_engine::isolation::IsolationManager;
use alphie_engine::merger::MergerOptions;
use alphie_engine::model::agent::Agent;
use alphie_engine::model::task::{Task, TaskType};
use alphie_engine::model::worktree::Worktree;
use alphie_engine::scheduler::tiers::Tier;
use alphie_engine::validator::Baseline;
use alphie_vcs::GitVcs;
use anyhow::{Context, Result};

use crate::runner_factory::{self, RunnerSpec};

/// Resolved flags common to `run` and `implement` (§6).
pub struct RunFlags {
    pub tier: Option<Tier>,
    pub greenfield: bool,
    pub quick: bool,
    pub parallel: bool,
    pub single: bool,
}

impl RunFlags {
    fn resolve_tier(&self, default_tier: Tier) -> Tier {
        if self.quick {
            return Tier::Quick;
        }
        if self.single {
            return Tier::Scout;
        }
        if self.parallel {
            return Tier::Builder;
        }
        self.tier.unwrap_or(default_tier)
    }
}

fn current_branch(vcs: &GitVcs, repo: &Path) -> Result<String> {
    vcs.resolve_ref(repo, "HEAD").context("resolving current HEAD")
}

/// Run a single free-form task (`alphie run <task>`, §6).
///
/// `Tier::Quick` bypasses decomposition and the scheduler entirely: one
/// agent runs inline, on the current branch, with no worktree isolation.
/// Every other tier decomposes the task into a DAG and drains it once
/// through the Scheduler, Executor, and Merger.
///
/// # Errors
/// Returns an error on VCS failures, a decomposer that never produces a
/// valid DAG, or engine-internal failures surfaced as [`anyhow::Error`].
pub fn run_task(
    project_root: &Path,
    task_description: &str,
    flags: &RunFlags,
    config: &EngineConfig,
    runner: &RunnerSpec,
) -> Result<()> {
    let vcs = GitVcs::new(Duration::from_secs(120));
    let tier = flags.resolve_tier(config.defaults.tier.unwrap_or(Tier::Builder));
    let params = tier.params(&config.execution.model, &config.timeouts);
    let bus = Arc::new(EventBus::default());

    if tier == Tier::Quick {
        let base_ref = current_branch(&vcs, project_root)?;
        let mut task = Task::new("quick task", TaskType::Feature);
        task.description = task_description.to_owned();
        let mut agent = Agent::new(task.id.clone(), project_root.to_owned(), base_ref.clone());
        let worktree = Worktree::new(project_root.to_owned(), base_ref.clone());
        let baseline = Baseline::empty();
        let options = alphie_engine::executor::ExecutorOptions {
            max_attempts: params.max_attempts,
            runner_options: runner_factory::runner_options(&params.model_name, project_root.to_owned(), params.timeout),
            quality_gates: config.quality_gates.clone(),
            command_timeout: params.timeout,
        };
        let result = alphie_engine::executor::execute(
            &vcs,
            &bus,
            &mut task,
            &mut agent,
            &worktree,
            &base_ref,
            &baseline,
            &options,
            || runner.make(),
        )?;
        if result.success {
            println!("quick task completed ({} file(s) changed)", result.changed_files.len());
        } else {
            println!("quick task did not pass validation: {}", result.terminal_error.unwrap_or_default());
            std::process::exit(1);
        }
        return Ok(());
    }

    let session_branch = format!("alphie/session-{}", alphie_engine::model::agent::AgentId::new());
    let base_ref = current_branch(&vcs, project_root)?;
    if !flags.greenfield {
        vcs.create_branch(&session_branch, &base_ref).context("creating session branch")?;
    }
    let work_branch = if flags.greenfield { base_ref.clone() } else { session_branch.clone() };

    let session_root = crate::cli_config::session_dir(project_root).join("worktrees");
    let isolation = IsolationManager::new(vcs.clone(), session_root, work_branch.clone(), flags.greenfield);

    let mut decomposer = runner.make();
    let decompose_options =
        runner_factory::runner_options(&params.model_name, project_root.to_owned(), params.timeout);
    let dag = alphie_engine::decompose::decompose(&mut decomposer, task_description, None, decompose_options)?;

    let baseline = Baseline::empty();
    let options = ArchitectOptions {
        max_iterations: 1,
        // `defaults.token_budget` counts tokens, not dollars; the Architect
        // Loop's stop condition is cost-based, so the two aren't
        // convertible without a price table this crate doesn't have.
        cost_budget_usd: None,
        no_progress_limit: 1,
        max_agents: params.max_agents,
        executor_options: alphie_engine::executor::ExecutorOptions {
            max_attempts: params.max_attempts,
            runner_options: runner_factory::runner_options(&params.model_name, project_root.to_owned(), params.timeout),
            quality_gates: config.quality_gates.clone(),
            command_timeout: params.timeout,
        },
        merger_options: MergerOptions::new(runner_factory::runner_options(
            &params.model_name,
            project_root.to_owned(),
            params.timeout,
        )),
        reviewer_options: runner_factory::runner_options(&params.model_name, project_root.to_owned(), params.timeout),
        command_timeout: params.timeout,
    };

    let (drained, cost) = architect::drain_dag(
        &vcs,
        &bus,
        &isolation,
        project_root,
        &work_branch,
        &baseline,
        dag,
        &options,
        &|| runner.make(),
        &|| runner.make(),
    );

    let completed = drained
        .tasks()
        .filter(|t| t.status == alphie_engine::model::task::TaskStatus::Completed)
        .count();
    println!("completed {} of {} task(s), cost ${:.2}", completed, drained.len(), cost);
    Ok(())
}

/// Run a whole-spec Architect Loop session (`alphie implement <spec-file>`,
/// §6).
///
/// # Errors
/// Returns an error if the spec file cannot be read, VCS setup fails, or
/// the loop hits an unrecoverable input error.
pub fn implement(project_root: &Path, spec_path: &Path, config: &EngineConfig, runner: &RunnerSpec) -> Result<()> {
    let vcs = GitVcs::new(Duration::from_secs(120));
    let tier = Tier::Architect;
    let params = tier.params(&config.execution.model, &config.timeouts);
    let bus = Arc::new(EventBus::default());

    let base_ref = current_branch(&vcs, project_root)?;
    let session_branch = format!("alphie/architect-{}", alphie_engine::model::agent::AgentId::new());
    if !config.branch.greenfield {
        vcs.create_branch(&session_branch, &base_ref).context("creating session branch")?;
    }
    let work_branch = if config.branch.greenfield { base_ref.clone() } else { session_branch.clone() };

    let session_root = crate::cli_config::session_dir(project_root).join("worktrees");
    let isolation = IsolationManager::new(vcs.clone(), session_root, work_branch.clone(), config.branch.greenfield);

    let reviewer_options = runner_factory::runner_options(&params.model_name, project_root.to_owned(), params.timeout);
    let options = ArchitectOptions {
        max_iterations: 20,
        // `defaults.token_budget` counts tokens, not dollars; the Architect
        // Loop's stop condition is cost-based, so the two aren't
        // convertible without a price table this crate doesn't have.
        cost_budget_usd: None,
        no_progress_limit: 3,
        max_agents: params.max_agents,
        executor_options: alphie_engine::executor::ExecutorOptions {
            max_attempts: params.max_attempts,
            runner_options: reviewer_options.clone(),
            quality_gates: config.quality_gates.clone(),
            command_timeout: params.timeout,
        },
        merger_options: MergerOptions::new(reviewer_options.clone()),
        reviewer_options: reviewer_options.clone(),
        command_timeout: params.timeout,
    };

    let baseline = Baseline::empty();
    let result = architect::run(
        &vcs,
        &bus,
        &isolation,
        project_root,
        &work_branch,
        spec_path,
        &baseline,
        &options,
        || runner.make(),
        || runner.make(),
        || runner.make(),
        || runner.make(),
    )?;

    println!(
        "architect loop stopped: {:?} after {} iteration(s), cost ${:.2}, completion {:.0}%",
        result.reason,
        result.iterations,
        result.cost_usd,
        result.report.completion_ratio() * 100.0
    );
    Ok(())
}
