//! Bounded, cancellable subprocess execution.
//!
//! Every sync-tool invocation goes through [`run_captured`]: stdio is
//! always piped (the child never inherits the daemon's streams), the child
//! is killed when its deadline passes or the run is cancelled, and captured
//! output is truncated to a bound so a chatty tool cannot blow up the run
//! record.

use std::process::Stdio;
use std::time::Duration;

use tokio::process::Command;
use tokio_util::sync::CancellationToken;

use crate::error::TransferError;

/// Upper bound on captured stdout/stderr kept for diagnostics (4 KiB each).
pub const DIAG_LIMIT: usize = 4096;

/// How one bounded subprocess invocation ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// The child ran to completion (any exit code).
    Completed {
        code: i32,
        stdout: String,
        stderr: String,
    },
    /// The deadline passed; the child was killed.
    TimedOut,
    /// The cancellation token fired; the child was killed.
    Cancelled,
}

impl ProcessOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, ProcessOutcome::Completed { code: 0, .. })
    }
}

/// Run `binary args…` with piped stdio under `timeout` and `cancel`.
///
/// Timeout and cancellation are outcomes, not errors; the only error is
/// failing to spawn the child at all.
pub async fn run_captured(
    binary: &str,
    args: &[String],
    timeout: Duration,
    cancel: &CancellationToken,
) -> Result<ProcessOutcome, TransferError> {
    let child = Command::new(binary)
        .args(args)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|source| TransferError::Spawn {
            binary: binary.to_string(),
            source,
        })?;

    tokio::select! {
        output = child.wait_with_output() => {
            let output = output.map_err(|source| TransferError::Spawn {
                binary: binary.to_string(),
                source,
            })?;
            Ok(ProcessOutcome::Completed {
                // Exit-by-signal has no code; -1 keeps the type honest.
                code: output.status.code().unwrap_or(-1),
                stdout: truncate_diag(&String::from_utf8_lossy(&output.stdout)),
                stderr: truncate_diag(&String::from_utf8_lossy(&output.stderr)),
            })
        }
        _ = tokio::time::sleep(timeout) => Ok(ProcessOutcome::TimedOut),
        _ = cancel.cancelled() => Ok(ProcessOutcome::Cancelled),
    }
}

/// Clamp diagnostic text to [`DIAG_LIMIT`] bytes on a char boundary.
pub fn truncate_diag(text: &str) -> String {
    let text = text.trim_end();
    if text.len() <= DIAG_LIMIT {
        return text.to_string();
    }
    let mut end = DIAG_LIMIT;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    let dropped = text.len() - end;
    format!("{}… [{dropped} bytes truncated]", &text[..end])
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
