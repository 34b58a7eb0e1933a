//! Intermediate artifact staging: archive build, encryption, and the
//! delete-on-every-exit-path guard.
//!
//! A run that compresses or encrypts owns exactly one staged file at a
//! time. The [`StagedArtifact`] guard deletes it when dropped, which is
//! what makes the "no leaked temp artifact after any terminal state"
//! guarantee hold even on early returns and cancellation.

use std::fs::File;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::Utc;
use flate2::write::GzEncoder;
use flate2::Compression;
use tokio_util::sync::CancellationToken;

use caravan_core::types::BackupTask;
use caravan_transfer::{run_captured, ProcessOutcome};

/// A temp-dir artifact that must not outlive its run.
#[derive(Debug)]
pub struct StagedArtifact {
    path: PathBuf,
}

impl StagedArtifact {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for StagedArtifact {
    fn drop(&mut self) {
        match std::fs::remove_file(&self.path) {
            Ok(()) => tracing::debug!(path = %self.path.display(), "removed staged artifact"),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {}
            Err(err) => {
                tracing::warn!(
                    path = %self.path.display(),
                    error = %err,
                    "failed to remove staged artifact",
                );
            }
        }
    }
}

/// How a staging step ended. Cancellation is its own arm so the executor
/// can mark the run `Cancelled` instead of `Failed`.
#[derive(Debug)]
pub enum StageOutcome {
    Done(StagedArtifact),
    Failed(String),
    Cancelled,
}

/// `<task_id>_<YYYYMMDD_HHMMSS>` — the base name every artifact of this
/// run derives from. Timestamped names are what retention later orders by.
pub fn artifact_base_name(task: &BackupTask) -> String {
    format!("{}_{}", task.id, Utc::now().format("%Y%m%d_%H%M%S"))
}

/// Build `<temp_dir>/<base_name>.tar.gz` from `source` (file or directory).
///
/// Blocking — the caller runs it under `spawn_blocking`. A half-written
/// archive is removed before the error is returned.
pub fn build_archive(
    source: &Path,
    temp_dir: &Path,
    base_name: &str,
) -> Result<PathBuf, String> {
    let archive_path = temp_dir.join(format!("{base_name}.tar.gz"));
    match write_archive(source, &archive_path) {
        Ok(()) => Ok(archive_path),
        Err(err) => {
            let _ = std::fs::remove_file(&archive_path);
            Err(format!("failed to archive {}: {err}", source.display()))
        }
    }
}

fn write_archive(source: &Path, archive_path: &Path) -> std::io::Result<()> {
    if let Some(parent) = archive_path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = File::create(archive_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut tar = tar::Builder::new(encoder);

    // Archive entries are rooted at the source's own name, so extraction
    // recreates `etc/…` rather than spraying files into the cwd.
    let arc_name = source
        .file_name()
        .map(|n| PathBuf::from(n))
        .unwrap_or_else(|| PathBuf::from("backup"));

    let meta = std::fs::metadata(source)?;
    if meta.is_dir() {
        tar.append_dir_all(&arc_name, source)?;
    } else {
        tar.append_path_with_name(source, &arc_name)?;
    }
    tar.into_inner()?.finish()?;
    Ok(())
}

/// Encrypt `input` into `output` by shelling out to the configured tool,
/// bounded by `timeout` and `cancel`. `output` must live in the temp dir —
/// the source tree is read-only to the engine.
///
/// The engine consumes an existing codec; it never implements one. A
/// partial output file is removed on failure, timeout, and cancellation.
pub async fn encrypt_artifact(
    binary: &str,
    input: &Path,
    output: &Path,
    key_file: &Path,
    timeout: Duration,
    cancel: &CancellationToken,
) -> StageOutcome {
    let args = vec![
        "--batch".to_string(),
        "--yes".to_string(),
        "--passphrase-file".to_string(),
        key_file.display().to_string(),
        "--symmetric".to_string(),
        "--cipher-algo".to_string(),
        "AES256".to_string(),
        "-o".to_string(),
        output.display().to_string(),
        input.display().to_string(),
    ];

    match run_captured(binary, &args, timeout, cancel).await {
        Ok(ProcessOutcome::Completed { code: 0, .. }) => {
            StageOutcome::Done(StagedArtifact::new(output.to_path_buf()))
        }
        Ok(ProcessOutcome::Completed { code, stderr, .. }) => {
            let _ = std::fs::remove_file(output);
            StageOutcome::Failed(format!(
                "encryption tool exited with code {code}: {stderr}"
            ))
        }
        Ok(ProcessOutcome::TimedOut) => {
            let _ = std::fs::remove_file(output);
            StageOutcome::Failed(format!(
                "encryption tool exceeded {}s deadline",
                timeout.as_secs()
            ))
        }
        Ok(ProcessOutcome::Cancelled) => {
            let _ = std::fs::remove_file(output);
            StageOutcome::Cancelled
        }
        Err(err) => {
            let _ = std::fs::remove_file(output);
            StageOutcome::Failed(err.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
