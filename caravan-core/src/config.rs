//! Deployment configuration.
//!
//! Loaded from `~/.caravan/config.yaml`; a missing file means every field
//! takes its default, so a fresh install works without any setup. Unknown
//! fields are rejected to catch typos early.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalog::{caravan_root, home};
use crate::error::CatalogError;

/// Engine-wide settings read once at daemon startup.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CaravanConfig {
    /// Root the logical filesystem `/` maps to inside the execution
    /// boundary where the sync tool runs. `None` = no boundary, paths
    /// pass through unchanged.
    pub boundary_root: Option<PathBuf>,

    /// System-wide cap on concurrently executing runs.
    pub max_concurrent_runs: usize,

    /// Deadline for one transfer to one target.
    pub transfer_timeout_secs: u64,
    /// Deadline for listing a remote directory (retention).
    pub list_timeout_secs: u64,
    /// Deadline for deleting one remote artifact (retention).
    pub delete_timeout_secs: u64,

    /// Scheduler tick interval.
    pub tick_secs: u64,

    pub rclone_binary: String,
    pub encryption_binary: String,
}

impl Default for CaravanConfig {
    fn default() -> Self {
        Self {
            boundary_root: None,
            max_concurrent_runs: 4,
            transfer_timeout_secs: 3600,
            list_timeout_secs: 60,
            delete_timeout_secs: 300,
            tick_secs: 30,
            rclone_binary: "rclone".to_string(),
            encryption_binary: "gpg".to_string(),
        }
    }
}

/// `<home>/.caravan/config.yaml` — pure, no I/O.
pub fn config_path_at(home: &Path) -> PathBuf {
    caravan_root(home).join("config.yaml")
}

/// Load the deployment config, falling back to defaults when the file is
/// absent.
pub fn load_config_at(home: &Path) -> Result<CaravanConfig, CatalogError> {
    let path = config_path_at(home);
    if !path.exists() {
        return Ok(CaravanConfig::default());
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| CatalogError::Parse { path, source: e })
}

/// `load_config_at` convenience wrapper.
pub fn load_config() -> Result<CaravanConfig, CatalogError> {
    load_config_at(&home()?)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn missing_file_yields_defaults() {
        let home = TempDir::new().expect("tempdir");
        let config = load_config_at(home.path()).expect("load");
        assert_eq!(config, CaravanConfig::default());
        assert_eq!(config.max_concurrent_runs, 4);
        assert_eq!(config.rclone_binary, "rclone");
    }

    #[test]
    fn partial_file_keeps_defaults_for_omitted_fields() {
        let home = TempDir::new().expect("tempdir");
        let dir = home.path().join(".caravan");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(
            dir.join("config.yaml"),
            "boundary_root: /mnt-root\nmax_concurrent_runs: 2\n",
        )
        .expect("write");

        let config = load_config_at(home.path()).expect("load");
        assert_eq!(config.boundary_root, Some(PathBuf::from("/mnt-root")));
        assert_eq!(config.max_concurrent_runs, 2);
        assert_eq!(config.transfer_timeout_secs, 3600, "default retained");
    }

    #[test]
    fn unknown_field_is_a_parse_error() {
        let home = TempDir::new().expect("tempdir");
        let dir = home.path().join(".caravan");
        fs::create_dir_all(&dir).expect("mkdir");
        fs::write(dir.join("config.yaml"), "max_concurent_runs: 2\n").expect("write");

        let err = load_config_at(home.path()).unwrap_err();
        assert!(matches!(err, CatalogError::Parse { .. }), "got: {err}");
    }
}
