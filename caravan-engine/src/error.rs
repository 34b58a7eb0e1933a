use std::path::PathBuf;

use thiserror::Error;

/// Error surface for the engine runtime, scheduler, and control protocol.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("catalog error: {0}")]
    Catalog(#[from] caravan_core::CatalogError),

    #[error("transfer error: {0}")]
    Transfer(#[from] caravan_transfer::TransferError),

    #[error("schedule error: {0}")]
    Schedule(#[from] caravan_core::ScheduleError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("channel closed: {0}")]
    ChannelClosed(&'static str),

    #[error("engine protocol error: {0}")]
    Protocol(String),

    #[error("daemon is not running (socket missing: {socket})")]
    DaemonNotRunning { socket: PathBuf },
}

pub(crate) fn io_err(path: impl Into<PathBuf>, source: std::io::Error) -> EngineError {
    EngineError::Io {
        path: path.into(),
        source,
    }
}
