//! Per-task execution-run history.
//!
//! # Storage layout
//!
//! ```text
//! ~/.caravan/
//!   runs/
//!     <task_id>.yaml    (list of runs, newest first — mode 0600)
//! ```
//!
//! One file per task keeps concurrent runs of *different* tasks from
//! contending; the scheduler's single-flight gate keeps two runs of the
//! *same* task from ever writing at once.

use std::path::{Path, PathBuf};

use chrono::Utc;

use crate::catalog::{caravan_root, ensure_dir, home, set_file_permissions};
use crate::error::CatalogError;
use crate::types::{ExecutionRun, RunId, RunStatus, TaskId};

/// `<home>/.caravan/runs/` — pure, no I/O.
pub fn runs_dir_at(home: &Path) -> PathBuf {
    caravan_root(home).join("runs")
}

/// `<home>/.caravan/runs/<task_id>.yaml` — pure, no I/O.
pub fn runs_path_at(home: &Path, task: &TaskId) -> PathBuf {
    runs_dir_at(home).join(format!("{}.yaml", task.0))
}

// ---------------------------------------------------------------------------
// Load / list
// ---------------------------------------------------------------------------

/// Load a task's run history, newest first. Missing file = no runs yet.
pub fn list_runs_at(home: &Path, task: &TaskId) -> Result<Vec<ExecutionRun>, CatalogError> {
    let path = runs_path_at(home, task);
    if !path.exists() {
        return Ok(vec![]);
    }
    let contents = std::fs::read_to_string(&path)?;
    let mut runs: Vec<ExecutionRun> =
        serde_yaml::from_str(&contents).map_err(|e| CatalogError::Parse { path, source: e })?;
    runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
    Ok(runs)
}

/// `list_runs_at` convenience wrapper.
pub fn list_runs(task: &TaskId) -> Result<Vec<ExecutionRun>, CatalogError> {
    list_runs_at(&home()?, task)
}

/// Find one run by id, scanning every task's history.
pub fn get_run_at(home: &Path, run: &RunId) -> Result<ExecutionRun, CatalogError> {
    let dir = runs_dir_at(home);
    if dir.exists() {
        let mut entries: Vec<_> = std::fs::read_dir(&dir)?.filter_map(|e| e.ok()).collect();
        entries.sort_by_key(|e| e.file_name());
        for entry in entries {
            let name = entry.file_name();
            let name = name.to_string_lossy();
            let Some(task_id) = name.strip_suffix(".yaml") else {
                continue;
            };
            let runs = list_runs_at(home, &TaskId::from(task_id))?;
            if let Some(found) = runs.into_iter().find(|r| &r.id == run) {
                return Ok(found);
            }
        }
    }
    Err(CatalogError::RunNotFound {
        id: run.to_string(),
    })
}

/// `get_run_at` convenience wrapper.
pub fn get_run(run: &RunId) -> Result<ExecutionRun, CatalogError> {
    get_run_at(&home()?, run)
}

// ---------------------------------------------------------------------------
// Append / update
// ---------------------------------------------------------------------------

/// Record a newly admitted run at the head of its task's history.
pub fn append_run_at(home: &Path, run: &ExecutionRun) -> Result<(), CatalogError> {
    let mut runs = list_runs_at(home, &run.task_id)?;
    runs.insert(0, run.clone());
    save_runs_at(home, &run.task_id, &runs)
}

/// `append_run_at` convenience wrapper.
pub fn append_run(run: &ExecutionRun) -> Result<(), CatalogError> {
    append_run_at(&home()?, run)
}

/// Replace the stored copy of `run` (matched by id) with its current state.
pub fn update_run_at(home: &Path, run: &ExecutionRun) -> Result<(), CatalogError> {
    let mut runs = list_runs_at(home, &run.task_id)?;
    let Some(slot) = runs.iter_mut().find(|r| r.id == run.id) else {
        return Err(CatalogError::RunNotFound {
            id: run.id.to_string(),
        });
    };
    *slot = run.clone();
    save_runs_at(home, &run.task_id, &runs)
}

/// `update_run_at` convenience wrapper.
pub fn update_run(run: &ExecutionRun) -> Result<(), CatalogError> {
    update_run_at(&home()?, run)
}

// ---------------------------------------------------------------------------
// Crash recovery
// ---------------------------------------------------------------------------

/// Reconcile runs left non-terminal by a prior process lifetime.
///
/// Called once at daemon startup, before the scheduler starts: anything
/// still `Pending`/`Running` on disk cannot actually be running, so it is
/// marked `Failed` with an explanatory error. Runs are never resumed.
///
/// Returns the number of runs reconciled.
pub fn reconcile_interrupted_at(home: &Path) -> Result<usize, CatalogError> {
    let dir = runs_dir_at(home);
    if !dir.exists() {
        return Ok(0);
    }

    let mut reconciled = 0usize;
    let mut entries: Vec<_> = std::fs::read_dir(&dir)?.filter_map(|e| e.ok()).collect();
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let name = entry.file_name();
        let name = name.to_string_lossy();
        let Some(task_id) = name.strip_suffix(".yaml") else {
            continue;
        };
        let task_id = TaskId::from(task_id);
        let mut runs = list_runs_at(home, &task_id)?;
        let mut dirty = false;
        for run in runs.iter_mut() {
            if run.status.is_terminal() {
                continue;
            }
            run.status = RunStatus::Failed;
            run.finished_at = Some(Utc::now());
            run.error = Some(
                "run was interrupted by a process shutdown and marked failed at startup"
                    .to_string(),
            );
            run.artifact = None;
            dirty = true;
            reconciled += 1;
        }
        if dirty {
            save_runs_at(home, &task_id, &runs)?;
        }
    }
    Ok(reconciled)
}

/// `reconcile_interrupted_at` convenience wrapper.
pub fn reconcile_interrupted() -> Result<usize, CatalogError> {
    reconcile_interrupted_at(&home()?)
}

// ---------------------------------------------------------------------------
// Private helpers
// ---------------------------------------------------------------------------

fn save_runs_at(home: &Path, task: &TaskId, runs: &[ExecutionRun]) -> Result<(), CatalogError> {
    let dir = runs_dir_at(home);
    ensure_dir(&dir)?;
    let path = runs_path_at(home, task);
    let tmp = path.with_file_name(format!("{}.yaml.tmp", task.0));

    let yaml = serde_yaml::to_string(runs)?;
    std::fs::write(&tmp, yaml)?;
    set_file_permissions(&tmp)?;
    std::fs::rename(&tmp, &path)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Unit tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{BackupTask, TargetBinding, TargetId};
    use chrono::Duration;
    use tempfile::TempDir;

    fn make_home() -> TempDir {
        TempDir::new().expect("tempdir")
    }

    fn sample_task(id: &str) -> BackupTask {
        let now = Utc::now();
        BackupTask {
            id: TaskId::from(id),
            name: id.to_string(),
            description: None,
            source_path: PathBuf::from("/var/data"),
            targets: vec![TargetBinding {
                target: TargetId::from("minio"),
                remote_path: "backups/data".to_string(),
            }],
            schedule: None,
            compress: false,
            encryption: None,
            retention_count: 0,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn append_then_list_newest_first() {
        let home = make_home();
        let task = sample_task("data");

        let mut older = ExecutionRun::admitted(&task);
        older.started_at = Utc::now() - Duration::hours(2);
        older.finish(RunStatus::Success);
        let mut newer = ExecutionRun::admitted(&task);
        newer.finish(RunStatus::Failed);

        append_run_at(home.path(), &older).expect("append older");
        append_run_at(home.path(), &newer).expect("append newer");

        let runs = list_runs_at(home.path(), &task.id).expect("list");
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].id, newer.id, "newest run must come first");
        assert_eq!(runs[1].id, older.id);
    }

    #[test]
    fn update_replaces_matching_run() {
        let home = make_home();
        let task = sample_task("data");
        let mut run = ExecutionRun::admitted(&task);
        append_run_at(home.path(), &run).expect("append");

        run.status = RunStatus::Running;
        update_run_at(home.path(), &run).expect("update");

        let stored = get_run_at(home.path(), &run.id).expect("get");
        assert_eq!(stored.status, RunStatus::Running);
    }

    #[test]
    fn update_unknown_run_errors() {
        let home = make_home();
        let task = sample_task("data");
        let run = ExecutionRun::admitted(&task);
        let err = update_run_at(home.path(), &run).unwrap_err();
        assert!(matches!(err, CatalogError::RunNotFound { .. }), "got: {err}");
    }

    #[test]
    fn get_run_searches_across_tasks() {
        let home = make_home();
        let task_a = sample_task("alpha");
        let task_b = sample_task("bravo");
        let run_a = ExecutionRun::admitted(&task_a);
        let run_b = ExecutionRun::admitted(&task_b);
        append_run_at(home.path(), &run_a).expect("append a");
        append_run_at(home.path(), &run_b).expect("append b");

        let found = get_run_at(home.path(), &run_b.id).expect("get");
        assert_eq!(found.task_id, task_b.id);

        let err = get_run_at(home.path(), &RunId::new()).unwrap_err();
        assert!(matches!(err, CatalogError::RunNotFound { .. }));
    }

    #[test]
    fn reconcile_fails_non_terminal_runs_only() {
        let home = make_home();
        let task = sample_task("data");

        let mut finished = ExecutionRun::admitted(&task);
        finished.finish(RunStatus::Success);
        let mut stuck = ExecutionRun::admitted(&task);
        stuck.status = RunStatus::Running;
        stuck.artifact = Some(PathBuf::from("/tmp/ghost.tar.gz"));

        append_run_at(home.path(), &finished).expect("append");
        append_run_at(home.path(), &stuck).expect("append");

        let n = reconcile_interrupted_at(home.path()).expect("reconcile");
        assert_eq!(n, 1);

        let stored = get_run_at(home.path(), &stuck.id).expect("get");
        assert_eq!(stored.status, RunStatus::Failed);
        assert!(stored.finished_at.is_some());
        assert!(stored.error.as_deref().unwrap_or("").contains("interrupted"));
        assert!(stored.artifact.is_none(), "stale artifact path must be cleared");

        let untouched = get_run_at(home.path(), &finished.id).expect("get");
        assert_eq!(untouched.status, RunStatus::Success);
    }

    #[test]
    fn reconcile_on_empty_home_is_noop() {
        let home = make_home();
        assert_eq!(reconcile_interrupted_at(home.path()).expect("reconcile"), 0);
    }
}
