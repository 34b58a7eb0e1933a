//! The transfer seam between the executor and the sync tool.
//!
//! The executor only ever talks to a [`TargetTransfer`]; production wires
//! in the rclone implementation, tests wire in fakes. A copy attempt never
//! errors — it resolves to a [`SyncOutcome`] value so the executor can
//! record it and move on to the next target.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;

use caravan_core::types::StorageTarget;

use crate::error::TransferError;

/// Outcome of one copy attempt against one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    Success {
        bytes_transferred: u64,
        /// The tool finished without reporting a byte count; the count is
        /// `0` by convention, never fabricated.
        size_unknown: bool,
    },
    /// Deadline exceeded; operator-retryable, never auto-retried.
    Timeout,
    /// Non-zero exit or transport error, with the tool's diagnostic text
    /// verbatim (bounded).
    TransferFailed { detail: String },
    /// The target's configuration cannot be turned into a tool config.
    ConfigInvalid { detail: String },
    /// The run was cancelled while this transfer was in flight.
    Cancelled,
}

/// One artifact at a remote path, as reported by the sync tool.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub mod_time: DateTime<Utc>,
    pub size: i64,
}

/// Copy, list, and delete against one storage target.
#[async_trait]
pub trait TargetTransfer: Send + Sync {
    /// Copy `artifact` (already translated into the execution boundary's
    /// namespace) into `remote_path` on `target`, bounded by `timeout` and
    /// `cancel`.
    async fn copy_to(
        &self,
        target: &StorageTarget,
        artifact: &Path,
        remote_path: &str,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> SyncOutcome;

    /// List the artifacts directly under `remote_path` on `target`.
    async fn list_remote(
        &self,
        target: &StorageTarget,
        remote_path: &str,
    ) -> Result<Vec<RemoteEntry>, TransferError>;

    /// Delete one artifact. Deleting a file that is already gone succeeds.
    async fn delete_remote(
        &self,
        target: &StorageTarget,
        remote_path: &str,
        name: &str,
    ) -> Result<(), TransferError>;
}
