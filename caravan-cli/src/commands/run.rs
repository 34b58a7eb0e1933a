//! `caravan run` / `caravan runs` / `caravan show-run` — manual triggers
//! and run-history display.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use caravan_core::runlog;
use caravan_core::types::{ExecutionRun, RunId, RunStatus, TargetOutcome, TaskId};
use caravan_engine::{request_cancel, request_trigger, EngineError};

/// Arguments for `caravan run`.
#[derive(Args, Debug)]
pub struct RunArgs {
    /// Task id to trigger.
    pub task: String,
}

impl RunArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;

        let data = match request_trigger(&home, self.task.clone()) {
            Ok(data) => data,
            Err(EngineError::DaemonNotRunning { .. }) => {
                println!(
                    "daemon is not running — start it with `caravan daemon start`"
                );
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to trigger task"),
        };

        match data["outcome"].as_str() {
            Some("started") => {
                let run = data["run"].as_str().unwrap_or("?");
                println!("{} run {run} for task '{}'", "started".green(), self.task);
            }
            Some("already-running") => {
                println!(
                    "{}: task '{}' already has a run in flight",
                    "refused".yellow(),
                    self.task
                );
            }
            _ => println!("unexpected daemon reply: {data}"),
        }
        Ok(())
    }
}

/// Arguments for `caravan runs`.
#[derive(Args, Debug)]
pub struct RunsArgs {
    /// Task id whose history to show.
    pub task: String,

    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

#[derive(Tabled)]
struct RunTableRow {
    #[tabled(rename = "run")]
    run: String,
    #[tabled(rename = "started")]
    started: String,
    #[tabled(rename = "status")]
    status: String,
    #[tabled(rename = "targets ok")]
    targets_ok: String,
    #[tabled(rename = "bytes")]
    bytes: u64,
    #[tabled(rename = "error")]
    error: String,
}

impl RunsArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
        let runs = runlog::list_runs_at(&home, &TaskId::from(self.task.clone()))
            .with_context(|| format!("failed to load run history for '{}'", self.task))?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&runs).context("failed to render run JSON")?
            );
            return Ok(());
        }

        if runs.is_empty() {
            println!("No runs recorded for task '{}'.", self.task);
            return Ok(());
        }

        let rows: Vec<RunTableRow> = runs.iter().map(run_row).collect();
        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}

fn run_row(run: &ExecutionRun) -> RunTableRow {
    let ok = run
        .target_results
        .iter()
        .filter(|r| r.outcome == TargetOutcome::Success)
        .count();
    let bytes = run
        .target_results
        .iter()
        .map(|r| r.bytes_transferred)
        .sum();
    RunTableRow {
        run: run.id.to_string(),
        started: run.started_at.format("%Y-%m-%d %H:%M:%S").to_string(),
        status: colored_status(run.status),
        targets_ok: format!("{ok}/{}", run.target_results.len()),
        bytes,
        error: run.error.clone().unwrap_or_default(),
    }
}

fn colored_status(status: RunStatus) -> String {
    match status {
        RunStatus::Success => status.to_string().green().to_string(),
        RunStatus::PartialFailure => status.to_string().yellow().to_string(),
        RunStatus::Failed => status.to_string().red().to_string(),
        RunStatus::Cancelled => status.to_string().yellow().to_string(),
        RunStatus::Pending | RunStatus::Running => status.to_string().cyan().to_string(),
    }
}

/// Arguments for `caravan cancel`.
#[derive(Args, Debug)]
pub struct CancelArgs {
    /// Run id (UUID) to cancel.
    pub run: String,
}

impl CancelArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;

        let data = match request_cancel(&home, self.run.clone()) {
            Ok(data) => data,
            Err(EngineError::DaemonNotRunning { .. }) => {
                println!("daemon is not running — nothing to cancel");
                return Ok(());
            }
            Err(err) => return Err(err).context("failed to cancel run"),
        };

        if data["cancelled"].as_bool().unwrap_or(false) {
            println!("{} run {}", "cancelling".yellow(), self.run);
        } else {
            println!("run {} is not pending or in flight", self.run);
        }
        Ok(())
    }
}

/// Arguments for `caravan show-run`.
#[derive(Args, Debug)]
pub struct ShowRunArgs {
    /// Run id (UUID) to display.
    pub run: String,
}

impl ShowRunArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
        let run_id: RunId = self
            .run
            .parse()
            .with_context(|| format!("'{}' is not a valid run id", self.run))?;
        let run = runlog::get_run_at(&home, &run_id)
            .with_context(|| format!("run '{}' not found", self.run))?;
        println!(
            "{}",
            serde_json::to_string_pretty(&run).context("failed to render run JSON")?
        );
        Ok(())
    }
}
