//! `alphie learn` (§6): capture and recall cross-session learnings as flat
//! Context/Action/Outcome (CAO) records under `.alphie/learnings/`.
//!
//! No database ships with this crate (§1 Non-goals) — learnings are plain
//! Markdown files, one per id, consistent with the rest of the persisted
//! `.alphie/` layout.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use uuid::Uuid;

use crate::cli_config;

/// `alphie learn` subcommands.
#[derive(Subcommand)]
pub enum LearnCommands {
    /// Capture a new Context/Action/Outcome learning.
    Capture(CaptureArgs),
    /// Print one learning by id.
    Show {
        /// Learning id.
        id: String,
    },
    /// List learnings whose context or action mentions `term`.
    Search {
        /// Substring to search for.
        term: String,
    },
    /// Delete a learning by id.
    Delete {
        /// Learning id.
        id: String,
    },
}

/// The Context/Action/Outcome triple for one captured learning.
#[derive(Args)]
pub struct CaptureArgs {
    /// What situation prompted this learning.
    pub context: String,
    /// What was tried.
    pub action: String,
    /// What happened as a result.
    pub outcome: String,
}

fn learnings_dir(project_root: &Path) -> PathBuf {
    cli_config::session_dir(project_root).join("learnings")
}

fn learning_path(project_root: &Path, id: &str) -> PathBuf {
    learnings_dir(project_root).join(format!("{id}.md"))
}

fn render(id: &str, args: &CaptureArgs) -> String {
    format!(
        "# learning {id}\n\n## context\n{}\n\n## action\n{}\n\n## outcome\n{}\n",
        args.context, args.action, args.outcome
    )
}

/// Run one `learn` subcommand against `project_root`.
///
/// # Errors
/// Returns an error if the learnings directory or an individual learning
/// file cannot be read or written.
pub fn run(project_root: &Path, command: LearnCommands) -> Result<()> {
    match command {
        LearnCommands::Capture(args) => {
            let dir = learnings_dir(project_root);
            std::fs::create_dir_all(&dir).context("creating .alphie/learnings")?;
            let id = Uuid::new_v4().to_string();
            std::fs::write(learning_path(project_root, &id), render(&id, &args))
                .context("writing learning")?;
            println!("captured learning {id}");
        }
        LearnCommands::Show { id } => {
            let path = learning_path(project_root, &id);
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("no such learning '{id}'"))?;
            print!("{contents}");
        }
        LearnCommands::Search { term } => {
            let dir = learnings_dir(project_root);
            let mut matched = Vec::new();
            if let Ok(entries) = std::fs::read_dir(&dir) {
                for entry in entries.flatten() {
                    let path = entry.path();
                    let Ok(contents) = std::fs::read_to_string(&path) else { continue };
                    if contents.to_lowercase().contains(&term.to_lowercase()) {
                        if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                            matched.push(stem.to_owned());
                        }
                    }
                }
            }
            matched.sort();
            if matched.is_empty() {
                println!("no learnings match '{term}'");
            }
            for id in matched {
                println!("{id}");
            }
        }
        LearnCommands::Delete { id } => {
            let path = learning_path(project_root, &id);
            std::fs::remove_file(&path).with_context(|| format!("no such learning '{id}'"))?;
            println!("deleted learning {id}");
        }
    }
    Ok(())
}
