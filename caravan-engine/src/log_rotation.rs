//! Size-based rotation for the daemon's log files.
//!
//! `daemon.log` / `daemon-err.log` roll over once they pass the size cap,
//! keeping a fixed number of numbered copies:
//! `daemon.log` → `daemon.log.1` → … → `daemon.log.5` (oldest dropped).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Rotation thresholds. Defaults: 10 MiB cap, 5 numbered copies.
#[derive(Debug, Clone, Copy)]
pub struct RotationPolicy {
    pub max_bytes: u64,
    pub max_copies: usize,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            max_bytes: 10 * 1024 * 1024,
            max_copies: 5,
        }
    }
}

impl RotationPolicy {
    /// Rotate `log_path` if it has outgrown `max_bytes`.
    ///
    /// Returns `true` when a rotation happened. A missing live log is not
    /// an error — there is simply nothing to rotate yet.
    pub fn rotate(&self, log_path: &Path) -> io::Result<bool> {
        let size = match fs::metadata(log_path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err),
        };
        if size < self.max_bytes {
            return Ok(false);
        }

        // Drop the oldest copy, shift the rest up, move the live log to .1.
        let oldest = numbered(log_path, self.max_copies);
        if oldest.exists() {
            fs::remove_file(&oldest)?;
        }
        for n in (1..self.max_copies).rev() {
            let src = numbered(log_path, n);
            if src.exists() {
                fs::rename(&src, numbered(log_path, n + 1))?;
            }
        }
        fs::rename(log_path, numbered(log_path, 1))?;

        // Leave a fresh, writable live log behind.
        fs::OpenOptions::new()
            .create(true)
            .truncate(true)
            .write(true)
            .open(log_path)?;
        Ok(true)
    }
}

/// Rotate both daemon log files under `home` with the default policy.
/// A failure on one file never blocks the other.
pub fn rotate_daemon_logs(home: &Path) {
    let policy = RotationPolicy::default();
    for log_path in [
        crate::paths::stdout_log_path(home),
        crate::paths::stderr_log_path(home),
    ] {
        match policy.rotate(&log_path) {
            Ok(true) => tracing::info!(path = %log_path.display(), "log file rotated"),
            Ok(false) => {}
            Err(err) => {
                tracing::warn!(path = %log_path.display(), error = %err, "log rotation failed")
            }
        }
    }
}

fn numbered(base: &Path, n: usize) -> PathBuf {
    let name = base
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or(crate::paths::DAEMON_STDOUT_LOG);
    base.with_file_name(format!("{name}.{n}"))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
