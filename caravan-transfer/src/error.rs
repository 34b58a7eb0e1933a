//! Error types for caravan-transfer.

use std::path::PathBuf;

use thiserror::Error;

use caravan_core::error::CatalogError;

/// All errors that can arise from boundary translation, process execution,
/// and remote listing/deletion.
///
/// The copy path deliberately does NOT use this type — a transfer attempt
/// always resolves to a [`crate::SyncOutcome`] value so one target's failure
/// stays a recorded result, never a propagated error.
#[derive(Debug, Error)]
pub enum TransferError {
    /// An I/O error, with annotated path for context.
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// An error from the catalog.
    #[error("catalog error: {0}")]
    Catalog(#[from] CatalogError),

    /// JSON parse error (sync tool listing output).
    #[error("listing JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A logical path outside the mapped root was handed to the boundary map.
    #[error("path {path} is outside the mapped root {root}")]
    OutOfScopePath { path: PathBuf, root: PathBuf },

    /// The sync tool could not be spawned at all (missing binary, perms).
    #[error("failed to spawn '{binary}': {source}")]
    Spawn {
        binary: String,
        #[source]
        source: std::io::Error,
    },

    /// The sync tool ran and reported a failure.
    #[error("sync tool error: {detail}")]
    Tool { detail: String },

    /// The sync tool exceeded its deadline and was killed.
    #[error("sync tool timed out after {seconds}s")]
    ToolTimeout { seconds: u64 },

    /// The operation was cancelled before completion.
    #[error("operation cancelled")]
    Cancelled,

    /// The target's configuration cannot be rendered for the sync tool.
    #[error("invalid target configuration: {detail}")]
    ConfigInvalid { detail: String },
}

/// Convenience constructor for [`TransferError::Io`].
pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> TransferError {
    TransferError::Io {
        path: path.into(),
        source,
    }
}
