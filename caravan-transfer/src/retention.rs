//! Retention enforcement at one target.
//!
//! Only ever invoked after a successful sync to that target. Everything
//! that goes wrong here is a warning on the per-target result — retention
//! never changes the run's status and one stubborn stale artifact never
//! stops the others from being deleted.

use caravan_core::types::StorageTarget;

use crate::invoker::{RemoteEntry, TargetTransfer};

/// What a retention pass did at one target.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetentionOutcome {
    /// Artifacts left in place (the `keep_count` newest, or fewer).
    pub kept: usize,
    /// Names actually deleted, in deletion order.
    pub deleted: Vec<String>,
    /// Non-fatal problems, for the per-target result.
    pub warnings: Vec<String>,
}

/// Keep the `keep_count` newest artifacts under `remote_path`, delete the
/// rest. `keep_count == 0` disables retention entirely.
///
/// Ordering is modification time descending, ties broken by name
/// descending, so a pass over the same listing always deletes the same
/// files.
pub async fn enforce(
    transfer: &dyn TargetTransfer,
    target: &StorageTarget,
    remote_path: &str,
    keep_count: u32,
) -> RetentionOutcome {
    let mut outcome = RetentionOutcome::default();
    if keep_count == 0 {
        return outcome;
    }

    let mut entries = match transfer.list_remote(target, remote_path).await {
        Ok(entries) => entries,
        Err(err) => {
            tracing::warn!(
                "retention listing failed for target {}: {}",
                target.id,
                err
            );
            outcome.warnings.push(format!("could not list artifacts: {err}"));
            return outcome;
        }
    };

    sort_newest_first(&mut entries);

    let keep = keep_count as usize;
    outcome.kept = entries.len().min(keep);
    let stale = if entries.len() > keep {
        entries.split_off(keep)
    } else {
        Vec::new()
    };

    for entry in stale {
        match transfer.delete_remote(target, remote_path, &entry.name).await {
            Ok(()) => {
                tracing::info!("deleted stale artifact {} at {}", entry.name, target.id);
                outcome.deleted.push(entry.name);
            }
            Err(err) => {
                tracing::warn!(
                    "failed to delete stale artifact {} at {}: {}",
                    entry.name,
                    target.id,
                    err
                );
                outcome
                    .warnings
                    .push(format!("could not delete {}: {err}", entry.name));
            }
        }
    }

    outcome
}

fn sort_newest_first(entries: &mut [RemoteEntry]) {
    entries.sort_by(|a, b| b.mod_time.cmp(&a.mod_time).then_with(|| b.name.cmp(&a.name)));
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
