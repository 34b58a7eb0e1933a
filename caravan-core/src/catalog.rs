//! On-disk catalog of task and target definitions.
//!
//! # Storage layout
//!
//! ```text
//! ~/.caravan/
//!   targets.yaml           (all storage targets — mode 0600)
//!   tasks/
//!     <task_id>.yaml       (one file per task — mode 0600)
//! ```
//!
//! The catalog stands in for the persistence collaborator: the engine only
//! reads snapshots at trigger time and never edits definitions itself.
//!
//! # API pattern
//!
//! Every function has two forms:
//! - `fn_at(home: &Path, …)` — explicit home; used in tests with `TempDir`
//! - `fn(…)` — derives home from `dirs::home_dir()`, delegates to `_at`
//!
//! Tests must NEVER call the no-arg wrappers; always use `_at`.

use std::path::{Path, PathBuf};

use crate::error::CatalogError;
use crate::types::{BackupTask, StorageTarget, TargetId, TaskId};

// ---------------------------------------------------------------------------
// 1. Path helpers
// ---------------------------------------------------------------------------

/// `<home>/.caravan/` — pure, no I/O.
pub fn caravan_root(home: &Path) -> PathBuf {
    home.join(".caravan")
}

/// `<home>/.caravan/targets.yaml` — pure, no I/O.
pub fn targets_path_at(home: &Path) -> PathBuf {
    caravan_root(home).join("targets.yaml")
}

/// `<home>/.caravan/tasks/` — pure, no I/O.
pub fn tasks_dir_at(home: &Path) -> PathBuf {
    caravan_root(home).join("tasks")
}

/// `<home>/.caravan/tasks/<task_id>.yaml` — pure, no I/O.
pub fn task_path_at(home: &Path, task: &TaskId) -> PathBuf {
    tasks_dir_at(home).join(format!("{}.yaml", task.0))
}

// ---------------------------------------------------------------------------
// 2. Targets
// ---------------------------------------------------------------------------

/// Load every storage target from `targets.yaml`.
///
/// A missing file means no targets are configured yet — returns an empty list.
pub fn load_targets_at(home: &Path) -> Result<Vec<StorageTarget>, CatalogError> {
    let path = targets_path_at(home);
    if !path.exists() {
        return Ok(vec![]);
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| CatalogError::Parse { path, source: e })
}

/// `load_targets_at` convenience wrapper.
pub fn load_targets() -> Result<Vec<StorageTarget>, CatalogError> {
    load_targets_at(&home()?)
}

/// Atomically save the whole target list to `targets.yaml`.
///
/// Write flow: serialize → `.yaml.tmp` sibling → `chmod 0600` → `rename`.
pub fn save_targets_at(home: &Path, targets: &[StorageTarget]) -> Result<(), CatalogError> {
    let root = caravan_root(home);
    ensure_dir(&root)?;
    let path = targets_path_at(home);
    let tmp = path.with_file_name("targets.yaml.tmp");

    let yaml = serde_yaml::to_string(targets)?;
    std::fs::write(&tmp, yaml)?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// `save_targets_at` convenience wrapper.
pub fn save_targets(targets: &[StorageTarget]) -> Result<(), CatalogError> {
    save_targets_at(&home()?, targets)
}

/// Find a target by id in an already-loaded list.
pub fn target_by_id<'a>(
    targets: &'a [StorageTarget],
    id: &TargetId,
) -> Option<&'a StorageTarget> {
    targets.iter().find(|t| &t.id == id)
}

// ---------------------------------------------------------------------------
// 3. Tasks
// ---------------------------------------------------------------------------

/// Load a single task from `tasks/<task_id>.yaml`.
///
/// Returns `CatalogError::TaskNotFound` if absent,
/// `CatalogError::Parse` (with path + line context) if malformed YAML.
pub fn load_task_at(home: &Path, task: &TaskId) -> Result<BackupTask, CatalogError> {
    let path = task_path_at(home, task);
    if !path.exists() {
        return Err(CatalogError::TaskNotFound { path });
    }
    let contents = std::fs::read_to_string(&path)?;
    serde_yaml::from_str(&contents).map_err(|e| CatalogError::Parse { path, source: e })
}

/// `load_task_at` convenience wrapper.
pub fn load_task(task: &TaskId) -> Result<BackupTask, CatalogError> {
    load_task_at(&home()?, task)
}

/// Walk `tasks/*.yaml` and return all task definitions, sorted by id.
pub fn list_tasks_at(home: &Path) -> Result<Vec<BackupTask>, CatalogError> {
    let dir = tasks_dir_at(home);
    if !dir.exists() {
        return Ok(vec![]);
    }

    let mut entries: Vec<_> = std::fs::read_dir(&dir)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());

    let mut tasks = Vec::new();
    for entry in entries {
        let fname = entry.file_name();
        let name = fname.to_string_lossy();
        if !name.ends_with(".yaml") {
            continue;
        }
        let contents = std::fs::read_to_string(entry.path())?;
        let task: BackupTask = serde_yaml::from_str(&contents).map_err(|e| {
            CatalogError::Parse {
                path: entry.path(),
                source: e,
            }
        })?;
        tasks.push(task);
    }
    tasks.sort_by(|a, b| a.id.0.cmp(&b.id.0));
    Ok(tasks)
}

/// `list_tasks_at` convenience wrapper.
pub fn list_tasks() -> Result<Vec<BackupTask>, CatalogError> {
    list_tasks_at(&home()?)
}

/// Atomically save a task to `tasks/<task_id>.yaml`.
pub fn save_task_at(home: &Path, task: &BackupTask) -> Result<(), CatalogError> {
    let dir = tasks_dir_at(home);
    ensure_dir(&dir)?;
    let path = task_path_at(home, &task.id);
    let tmp = path.with_file_name(format!("{}.yaml.tmp", task.id.0));

    let yaml = serde_yaml::to_string(task)?;
    std::fs::write(&tmp, yaml)?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

/// `save_task_at` convenience wrapper.
pub fn save_task(task: &BackupTask) -> Result<(), CatalogError> {
    save_task_at(&home()?, task)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

pub(crate) fn home() -> Result<PathBuf, CatalogError> {
    dirs::home_dir().ok_or(CatalogError::HomeNotFound)
}

pub(crate) fn ensure_dir(dir: &Path) -> Result<(), CatalogError> {
    if !dir.exists() {
        std::fs::create_dir_all(dir)?;
        set_dir_permissions(dir)?;
    }
    Ok(())
}

#[cfg(unix)]
fn set_dir_permissions(path: &Path) -> Result<(), CatalogError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o700))?;
    Ok(())
}
#[cfg(not(unix))]
fn set_dir_permissions(_path: &Path) -> Result<(), CatalogError> {
    Ok(())
}

#[cfg(unix)]
pub(crate) fn set_file_permissions(path: &Path) -> Result<(), CatalogError> {
    use std::os::unix::fs::PermissionsExt;
    std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600))?;
    Ok(())
}
#[cfg(not(unix))]
pub(crate) fn set_file_permissions(_path: &Path) -> Result<(), CatalogError> {
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------
