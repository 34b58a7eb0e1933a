//! `caravan status` — daemon scheduling visibility.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Args;

use caravan_engine::paths::socket_path;
use caravan_engine::{request_status, EngineError};

/// Arguments for `caravan status`.
#[derive(Args, Debug)]
pub struct StatusArgs {}

impl StatusArgs {
    pub fn run(self) -> Result<()> {
        let home: PathBuf = dirs::home_dir().context("could not determine home directory")?;

        match request_status(&home) {
            Ok(status) => {
                println!(
                    "{}",
                    serde_json::to_string_pretty(&status)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(EngineError::DaemonNotRunning { .. }) => {
                let payload = serde_json::json!({
                    "running": false,
                    "socket": socket_path(&home).display().to_string(),
                });
                println!(
                    "{}",
                    serde_json::to_string_pretty(&payload)
                        .context("failed to render daemon status JSON")?
                );
            }
            Err(err) => return Err(err).context("failed to query daemon status"),
        }
        Ok(())
    }
}
