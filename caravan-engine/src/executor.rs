//! One run of one task, end to end.
//!
//! Stage order: validate source → [compress] → [encrypt] → per-target
//! fan-out (translate, copy, retention) → aggregate → cleanup → persist.
//! Pre-fan-out failures abort the whole run with `Failed` and no target
//! attempts; per-target failures are isolated and only meet at the final
//! status computation. The staged-artifact guard makes cleanup
//! unconditional — any return path deletes the intermediate file.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use caravan_core::types::{
    BackupTask, ExecutionRun, RunStatus, StorageTarget, TargetBinding, TargetOutcome,
    TargetResult,
};
use caravan_core::{catalog, runlog, CaravanConfig};
use caravan_transfer::{retention, BoundaryMap, SyncOutcome, TargetTransfer};

use crate::artifact::{self, StageOutcome, StagedArtifact};

/// Everything a run needs besides its snapshot: shared, read-only.
pub struct ExecutorDeps {
    pub home: PathBuf,
    pub config: CaravanConfig,
    pub boundary: BoundaryMap,
    pub transfer: Arc<dyn TargetTransfer>,
    pub temp_dir: PathBuf,
}

/// Drive `run` for the snapshotted `task` to a terminal state.
///
/// The run record must already be in the run log (appended at admission);
/// every state transition is persisted as it happens so `caravan runs`
/// shows live progress.
pub async fn execute_run(
    deps: &ExecutorDeps,
    task: BackupTask,
    targets: Vec<StorageTarget>,
    mut run: ExecutionRun,
    cancel: CancellationToken,
) -> ExecutionRun {
    run.status = RunStatus::Running;
    persist(&deps.home, &run);
    tracing::info!(task = %task.id, run = %run.id, "run started");

    if task.targets.is_empty() {
        return fail(deps, run, "task has no targets configured".to_string());
    }

    // Stage 1: the source must exist and be readable before anything else.
    if let Err(err) = tokio::fs::metadata(&task.source_path).await {
        return fail(
            deps,
            run,
            format!("source unavailable: {}: {err}", task.source_path.display()),
        );
    }

    if cancel.is_cancelled() {
        return finish_cancelled(deps, run);
    }

    // Stages 2–3: staging. `staged` owns the intermediate artifact; its
    // Drop deletes the file on every path out of this function.
    let mut staged: Option<StagedArtifact> = None;
    let base_name = artifact::artifact_base_name(&task);

    if task.compress {
        let source = task.source_path.clone();
        let temp = deps.temp_dir.clone();
        let base = base_name.clone();
        let built =
            tokio::task::spawn_blocking(move || artifact::build_archive(&source, &temp, &base))
                .await;
        match built {
            Ok(Ok(path)) => {
                run.artifact = Some(path.clone());
                staged = Some(StagedArtifact::new(path));
                persist(&deps.home, &run);
            }
            Ok(Err(detail)) => return fail(deps, run, format!("compression failed: {detail}")),
            Err(join_err) => {
                return fail(deps, run, format!("compression failed: {join_err}"))
            }
        }

        if cancel.is_cancelled() {
            return finish_cancelled(deps, run);
        }
    }

    if let Some(encryption) = &task.encryption {
        let input = staged
            .as_ref()
            .map(|s| s.path().to_path_buf())
            .unwrap_or_else(|| task.source_path.clone());
        let output = encrypted_output_path(&deps.temp_dir, &base_name, staged.as_ref(), &task);

        let timeout = Duration::from_secs(deps.config.transfer_timeout_secs);
        match artifact::encrypt_artifact(
            &deps.config.encryption_binary,
            &input,
            &output,
            &encryption.key_file,
            timeout,
            &cancel,
        )
        .await
        {
            StageOutcome::Done(new_staged) => {
                // Dropping the old guard removes the plaintext archive.
                staged = Some(new_staged);
                run.artifact = Some(output);
                persist(&deps.home, &run);
            }
            StageOutcome::Failed(detail) => {
                return fail(deps, run, format!("encryption failed: {detail}"));
            }
            StageOutcome::Cancelled => return finish_cancelled(deps, run),
        }

        if cancel.is_cancelled() {
            return finish_cancelled(deps, run);
        }
    }

    // Stage 4: with neither stage active, the artifact is the source path
    // itself — read-only, never owned by a guard, never deleted.
    let artifact_path = staged
        .as_ref()
        .map(|s| s.path().to_path_buf())
        .unwrap_or_else(|| task.source_path.clone());

    // Stage 5: fan out over targets, in binding order, isolated from each
    // other. A target's failure is recorded and the loop moves on.
    let mut cancelled_mid_flight = false;
    for idx in 0..task.targets.len() {
        if cancel.is_cancelled() {
            cancelled_mid_flight = true;
            break;
        }
        let binding = task.targets[idx].clone();
        let (result, interrupted) =
            attempt_target(deps, &task, &targets, &binding, &artifact_path, &cancel).await;
        run.target_results[idx] = result;
        persist(&deps.home, &run);
        if interrupted {
            cancelled_mid_flight = true;
            break;
        }
    }

    // Stage 7: cleanup before the terminal transition is recorded.
    drop(staged);
    run.artifact = None;

    // Stage 6: aggregate.
    let status = if cancelled_mid_flight || cancel.is_cancelled() {
        RunStatus::Cancelled
    } else {
        aggregate_status(&run.target_results)
    };
    run.finish(status);
    persist(&deps.home, &run);
    tracing::info!(task = %task.id, run = %run.id, status = %run.status, "run finished");
    run
}

/// Translate, copy, and (on success) enforce retention for one binding.
/// Returns the filled-in result and whether the transfer was interrupted
/// by cancellation.
async fn attempt_target(
    deps: &ExecutorDeps,
    task: &BackupTask,
    targets: &[StorageTarget],
    binding: &TargetBinding,
    artifact_path: &Path,
    cancel: &CancellationToken,
) -> (TargetResult, bool) {
    let mut result = TargetResult::skipped(binding);

    let Some(target) = catalog::target_by_id(targets, &binding.target) else {
        result.outcome = TargetOutcome::ConfigInvalid;
        result.detail = Some(format!(
            "target '{}' is not defined in the catalog",
            binding.target
        ));
        return (result, false);
    };

    let execution_path = match deps.boundary.to_execution(artifact_path) {
        Ok(path) => path,
        Err(err) => {
            result.outcome = TargetOutcome::ConfigInvalid;
            result.detail = Some(err.to_string());
            return (result, false);
        }
    };

    let timeout = Duration::from_secs(deps.config.transfer_timeout_secs);
    match deps
        .transfer
        .copy_to(target, &execution_path, &binding.remote_path, timeout, cancel)
        .await
    {
        SyncOutcome::Success {
            bytes_transferred,
            size_unknown,
        } => {
            result.outcome = TargetOutcome::Success;
            result.bytes_transferred = bytes_transferred;
            result.size_unknown = size_unknown;

            let retention_pass = retention::enforce(
                deps.transfer.as_ref(),
                target,
                &binding.remote_path,
                task.retention_count,
            )
            .await;
            result.retention_warnings = retention_pass.warnings;
        }
        SyncOutcome::Timeout => {
            result.outcome = TargetOutcome::Timeout;
            result.detail = Some(format!("transfer exceeded {}s deadline", timeout.as_secs()));
        }
        SyncOutcome::TransferFailed { detail } => {
            result.outcome = TargetOutcome::TransferFailed;
            result.detail = Some(detail);
        }
        SyncOutcome::ConfigInvalid { detail } => {
            result.outcome = TargetOutcome::ConfigInvalid;
            result.detail = Some(detail);
        }
        SyncOutcome::Cancelled => {
            result.detail = Some("transfer aborted by cancellation".to_string());
            return (result, true);
        }
    }
    (result, false)
}

/// All success → `Success`; none → `Failed`; mixed → `PartialFailure`.
/// With one target only the first two are reachable.
fn aggregate_status(results: &[TargetResult]) -> RunStatus {
    let successes = results
        .iter()
        .filter(|r| r.outcome == TargetOutcome::Success)
        .count();
    if successes == results.len() {
        RunStatus::Success
    } else if successes == 0 {
        RunStatus::Failed
    } else {
        RunStatus::PartialFailure
    }
}

fn encrypted_output_path(
    temp_dir: &Path,
    base_name: &str,
    staged: Option<&StagedArtifact>,
    task: &BackupTask,
) -> PathBuf {
    match staged {
        // etc_20240310_023000.tar.gz → etc_20240310_023000.tar.gz.gpg
        Some(staged) => {
            let name = staged
                .path()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| base_name.to_string());
            temp_dir.join(format!("{name}.gpg"))
        }
        // Raw source file /srv/db/dump.sql → etc temp/<base>_dump.sql.gpg
        None => {
            let source_name = task
                .source_path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| "source".to_string());
            temp_dir.join(format!("{base_name}_{source_name}.gpg"))
        }
    }
}

fn fail(deps: &ExecutorDeps, mut run: ExecutionRun, message: String) -> ExecutionRun {
    tracing::warn!(task = %run.task_id, run = %run.id, error = %message, "run failed");
    run.error = Some(message);
    run.artifact = None;
    run.finish(RunStatus::Failed);
    persist(&deps.home, &run);
    run
}

fn finish_cancelled(deps: &ExecutorDeps, mut run: ExecutionRun) -> ExecutionRun {
    tracing::info!(task = %run.task_id, run = %run.id, "run cancelled");
    run.artifact = None;
    run.finish(RunStatus::Cancelled);
    persist(&deps.home, &run);
    run
}

fn persist(home: &Path, run: &ExecutionRun) {
    if let Err(err) = runlog::update_run_at(home, run) {
        tracing::warn!(run = %run.id, error = %err, "failed to persist run state");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
