mod commands;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use wavesmith_core::types::{Layer, ProjectLevel};

use commands::Project;

/// wavesmith -- plan layered work into waves of isolated git worktrees.
#[derive(Parser)]
#[command(name = "wavesmith", version, about)]
struct Cli {
    /// Project root (defaults to the current directory).
    #[arg(long, global = true)]
    root: Option<PathBuf>,

    /// Log level, overriding the `[logging]` config section.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the current wave execution (default when no subcommand is given).
    Status {
        /// Print the raw state document instead of a summary.
        #[arg(long)]
        json: bool,
    },

    /// Build a wave plan and install it as the current wave execution.
    Plan {
        /// Feature identifier used in branch names.
        #[arg(long)]
        feature: String,
        /// Task as `layer[:title]`; grouped by layer dependencies.
        #[arg(long = "task", value_name = "LAYER[:TITLE]")]
        tasks: Vec<String>,
        /// JSON file with explicit parallel groups (`[[{layer,title,owner}]]`).
        #[arg(long, conflicts_with = "tasks")]
        groups: Option<PathBuf>,
        /// Team members assigned round-robin as task owners.
        #[arg(long, value_delimiter = ',')]
        members: Vec<String>,
        /// Complexity score; at or above the threshold waves get cross-validated.
        #[arg(long)]
        complexity: Option<u32>,
        /// Project level, overriding `general.level`.
        #[arg(long)]
        level: Option<ProjectLevel>,
        /// Replace an unfinished wave execution.
        #[arg(long)]
        force: bool,
    },

    /// Provision worktrees for a pending wave and print its dispatch.
    Start {
        /// Wave to start (defaults to the first pending wave).
        #[arg(long)]
        wave: Option<u32>,
    },

    /// Report a task as completed.
    Complete {
        #[arg(long)]
        wave: u32,
        #[arg(long)]
        layer: Layer,
    },

    /// Report a task as failed.
    Fail {
        #[arg(long)]
        wave: u32,
        #[arg(long)]
        layer: Layer,
        /// Error details passed on to a helper agent.
        #[arg(long)]
        error: Option<String>,
    },

    /// Verify and merge a completed wave, then reschedule its failures.
    Finalize {
        #[arg(long)]
        wave: u32,
        /// Skip moving failed tasks into the next wave.
        #[arg(long)]
        no_reschedule: bool,
    },

    /// Move failed, never-retried tasks of a wave into the next wave.
    Reschedule {
        #[arg(long)]
        wave: u32,
    },

    /// Print the dispatch block for the active wave.
    Dispatch {
        #[arg(long)]
        wave: Option<u32>,
        /// Print the whole execution plan instead of just the dispatch.
        #[arg(long)]
        plan: bool,
    },

    /// Record metrics for the current run and relearn the policy.
    Record {
        /// Remove the wave execution after recording.
        #[arg(long)]
        clear: bool,
    },

    /// Inspect or rebuild the learned policy.
    Policy {
        #[command(subcommand)]
        action: PolicyAction,
    },

    /// Pick an alternate agent for a rescheduled task.
    Reassign {
        /// Wave holding the pending retry.
        #[arg(long)]
        wave: u32,
        #[arg(long)]
        layer: Layer,
    },

    /// List git worktrees of the project.
    Worktrees,
}

#[derive(Subcommand)]
enum PolicyAction {
    /// Relearn the policy from the metrics history.
    Rebuild,
    /// Print the stored policy document.
    Show,
    /// Print the flattened advisory suggestions.
    Suggest,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let project = Project::open(cli.root)?;
    wavesmith_telemetry::init_from_config("wavesmith", &project.config.logging, cli.log_level.as_deref());

    match cli.command {
        None => commands::status::run(&project, false)?,
        Some(Commands::Status { json }) => commands::status::run(&project, json)?,
        Some(Commands::Plan {
            feature,
            tasks,
            groups,
            members,
            complexity,
            level,
            force,
        }) => {
            let request = commands::plan::PlanRequest {
                feature,
                tasks,
                groups,
                members,
                complexity,
                level,
                force,
            };
            commands::plan::run(&project, request)?;
        }
        Some(Commands::Start { wave }) => commands::start::run(&project, wave)?,
        Some(Commands::Complete { wave, layer }) => commands::task::complete(&project, wave, layer)?,
        Some(Commands::Fail { wave, layer, error }) => {
            commands::task::fail(&project, wave, layer, error.as_deref())?
        }
        Some(Commands::Finalize { wave, no_reschedule }) => {
            commands::finalize::run(&project, wave, !no_reschedule)?
        }
        Some(Commands::Reschedule { wave }) => commands::finalize::reschedule(&project, wave)?,
        Some(Commands::Dispatch { wave, plan }) => commands::dispatch::run(&project, wave, plan)?,
        Some(Commands::Record { clear }) => commands::record::run(&project, clear)?,
        Some(Commands::Policy { action }) => match action {
            PolicyAction::Rebuild => commands::policy::rebuild(&project)?,
            PolicyAction::Show => commands::policy::show(&project)?,
            PolicyAction::Suggest => commands::policy::suggest(&project)?,
        },
        Some(Commands::Reassign { wave, layer }) => commands::reassign::run(&project, wave, layer)?,
        Some(Commands::Worktrees) => commands::worktrees::run(&project)?,
    }

    Ok(())
}
