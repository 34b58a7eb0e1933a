//! `caravan task` — catalog inspection.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Args, Subcommand};
use colored::Colorize;
use tabled::{settings::Style, Table, Tabled};

use caravan_core::catalog;

#[derive(Subcommand, Debug)]
pub enum TaskCommand {
    /// List every configured backup task.
    List(TaskListArgs),
}

#[derive(Args, Debug)]
pub struct TaskListArgs {
    /// Emit machine-readable JSON.
    #[arg(long)]
    pub json: bool,
}

pub fn run(command: TaskCommand) -> Result<()> {
    match command {
        TaskCommand::List(args) => args.run(),
    }
}

#[derive(Tabled)]
struct TaskTableRow {
    #[tabled(rename = "task")]
    task: String,
    #[tabled(rename = "source")]
    source: String,
    #[tabled(rename = "targets")]
    targets: usize,
    #[tabled(rename = "schedule")]
    schedule: String,
    #[tabled(rename = "keep")]
    keep: String,
    #[tabled(rename = "enabled")]
    enabled: String,
}

impl TaskListArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;
        let tasks = catalog::list_tasks_at(&home).context("failed to load task catalog")?;

        if self.json {
            println!(
                "{}",
                serde_json::to_string_pretty(&tasks).context("failed to render task JSON")?
            );
            return Ok(());
        }

        if tasks.is_empty() {
            println!("No tasks configured. Add YAML files under ~/.caravan/tasks/.");
            return Ok(());
        }

        let rows: Vec<TaskTableRow> = tasks
            .iter()
            .map(|task| TaskTableRow {
                task: task.id.to_string(),
                source: task.source_path.display().to_string(),
                targets: task.targets.len(),
                schedule: task
                    .schedule
                    .clone()
                    .unwrap_or_else(|| "manual".to_string()),
                keep: if task.retention_count == 0 {
                    "all".to_string()
                } else {
                    task.retention_count.to_string()
                },
                enabled: if task.enabled {
                    "yes".green().to_string()
                } else {
                    "no".red().to_string()
                },
            })
            .collect();

        let mut table = Table::new(rows);
        table.with(Style::rounded());
        println!("{table}");
        Ok(())
    }
}
