//! Caravan — scheduled backup orchestration CLI.
//!
//! # Usage
//!
//! ```text
//! caravan task list [--json]
//! caravan run <task>
//! caravan runs <task> [--json]
//! caravan show-run <run-id>
//! caravan cancel <run-id>
//! caravan status
//! caravan daemon start|stop|status|logs
//! ```

mod commands;

use anyhow::Result;
use clap::{Parser, Subcommand};

use commands::{
    daemon::DaemonCommand,
    run::{CancelArgs, RunArgs, RunsArgs, ShowRunArgs},
    status::StatusArgs,
    task::TaskCommand,
};

// ---------------------------------------------------------------------------
// CLI entry point
// ---------------------------------------------------------------------------

#[derive(Parser, Debug)]
#[command(
    name = "caravan",
    version,
    about = "Scheduled backups from local paths to remote storage",
    long_about = None,
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Inspect configured backup tasks.
    Task {
        #[command(subcommand)]
        command: TaskCommand,
    },

    /// Trigger one run of a task on the running daemon.
    Run(RunArgs),

    /// Show a task's run history, most recent first.
    Runs(RunsArgs),

    /// Show one run in full detail.
    ShowRun(ShowRunArgs),

    /// Cancel a pending or in-flight run.
    Cancel(CancelArgs),

    /// Query daemon scheduling status over the control socket.
    Status(StatusArgs),

    /// Manage the Caravan background daemon.
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

fn main() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Task { command } => commands::task::run(command),
        Commands::Run(args) => args.run(),
        Commands::Runs(args) => args.run(),
        Commands::ShowRun(args) => args.run(),
        Commands::Cancel(args) => args.run(),
        Commands::Status(args) => args.run(),
        Commands::Daemon { command } => commands::daemon::run(command),
    }
}
