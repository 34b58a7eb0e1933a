//! Error types for caravan-core.

use std::path::PathBuf;

use thiserror::Error;

/// All errors that can arise from catalog and run-log operations.
#[derive(Debug, Error)]
pub enum CatalogError {
    /// Underlying I/O failure (file not found, permission denied, etc.).
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization error (write/save path).
    #[error("YAML serialization error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// YAML parse error on load — includes file path and line context from serde_yaml.
    #[error("failed to parse {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    /// `dirs::home_dir()` returned `None` — cannot locate `~/.caravan/`.
    #[error("cannot determine home directory; set $HOME or equivalent")]
    HomeNotFound,

    /// A task definition file did not exist at the expected path.
    #[error("task not found at {path}")]
    TaskNotFound { path: PathBuf },

    /// No run with the given id exists anywhere in the run log.
    #[error("run not found: {id}")]
    RunNotFound { id: String },
}
