//! Path translation between the orchestrator and the execution boundary.
//!
//! The sync tool may run in an isolated environment (a container, a mount
//! namespace) that sees the orchestrator's filesystem under a different
//! root. A [`BoundaryMap`] holds the one configured prefix pair per
//! deployment and translates in both directions. Translation is a pure
//! function of the pair — no I/O, no locking, safe from any thread.

use std::path::{Path, PathBuf};

use crate::error::TransferError;

/// One logical-root ↔ execution-root prefix pair, or the identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BoundaryMap {
    /// `(logical_root, execution_root)`; `None` = non-isolated deployment.
    mapping: Option<(PathBuf, PathBuf)>,
}

impl BoundaryMap {
    /// No boundary: both directions return the path unchanged.
    pub fn identity() -> Self {
        Self { mapping: None }
    }

    /// Map `logical_root` to `execution_root`.
    pub fn new(logical_root: impl Into<PathBuf>, execution_root: impl Into<PathBuf>) -> Self {
        Self {
            mapping: Some((logical_root.into(), execution_root.into())),
        }
    }

    /// Build from deployment config: the logical root is always `/`,
    /// mapped onto `boundary_root` when one is configured.
    pub fn from_config(boundary_root: Option<&Path>) -> Self {
        match boundary_root {
            Some(root) => Self::new("/", root),
            None => Self::identity(),
        }
    }

    /// Translate an orchestrator-namespace path into the execution boundary.
    ///
    /// Errors with [`TransferError::OutOfScopePath`] if `path` does not lie
    /// under the mapped logical root; paths are never silently passed
    /// through a configured boundary.
    pub fn to_execution(&self, path: &Path) -> Result<PathBuf, TransferError> {
        match &self.mapping {
            None => Ok(path.to_path_buf()),
            Some((logical, execution)) => rebase(path, logical, execution),
        }
    }

    /// Inverse of [`Self::to_execution`].
    pub fn to_logical(&self, path: &Path) -> Result<PathBuf, TransferError> {
        match &self.mapping {
            None => Ok(path.to_path_buf()),
            Some((logical, execution)) => rebase(path, execution, logical),
        }
    }
}

fn rebase(path: &Path, from: &Path, to: &Path) -> Result<PathBuf, TransferError> {
    let relative = path
        .strip_prefix(from)
        .map_err(|_| TransferError::OutOfScopePath {
            path: path.to_path_buf(),
            root: from.to_path_buf(),
        })?;
    Ok(to.join(relative))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_passes_paths_through() {
        let map = BoundaryMap::identity();
        let p = Path::new("/var/backups/etc.tar.gz");
        assert_eq!(map.to_execution(p).expect("to_execution"), p);
        assert_eq!(map.to_logical(p).expect("to_logical"), p);
    }

    #[test]
    fn translation_rebases_under_execution_root() {
        let map = BoundaryMap::new("/", "/mnt-root");
        let out = map
            .to_execution(Path::new("/home/ops/data"))
            .expect("to_execution");
        assert_eq!(out, Path::new("/mnt-root/home/ops/data"));
    }

    #[test]
    fn round_trip_is_identity_under_the_root() {
        let map = BoundaryMap::new("/srv", "/mnt-root/srv");
        for p in ["/srv/media", "/srv/media/photos/2024", "/srv"] {
            let p = Path::new(p);
            let there = map.to_execution(p).expect("to_execution");
            let back = map.to_logical(&there).expect("to_logical");
            assert_eq!(back, p, "round trip must be identity for {}", p.display());
        }
    }

    #[test]
    fn path_outside_logical_root_is_rejected() {
        let map = BoundaryMap::new("/srv", "/mnt-root/srv");
        let err = map.to_execution(Path::new("/etc/passwd")).unwrap_err();
        assert!(matches!(err, TransferError::OutOfScopePath { .. }), "got: {err}");
    }

    #[test]
    fn path_outside_execution_root_is_rejected_on_the_way_back() {
        let map = BoundaryMap::new("/srv", "/mnt-root/srv");
        let err = map.to_logical(Path::new("/tmp/elsewhere")).unwrap_err();
        assert!(matches!(err, TransferError::OutOfScopePath { .. }));
    }

    #[test]
    fn relative_path_is_out_of_scope_with_a_configured_boundary() {
        let map = BoundaryMap::from_config(Some(Path::new("/mnt-root")));
        let err = map.to_execution(Path::new("data/temp/x.tar.gz")).unwrap_err();
        assert!(matches!(err, TransferError::OutOfScopePath { .. }));
    }

    #[test]
    fn from_config_without_root_is_identity() {
        assert_eq!(BoundaryMap::from_config(None), BoundaryMap::identity());
    }
}
