//! Domain types for the Caravan catalog and run log.
//!
//! All path fields use `PathBuf`; never `&str` or `String` for filesystem paths.
//! All types are serializable/deserializable via serde + serde_yaml.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// Newtypes
// ---------------------------------------------------------------------------

/// A strongly-typed identifier for a backup task.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(pub String);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TaskId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TaskId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed identifier for a storage target.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetId(pub String);

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl From<String> for TargetId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl From<&str> for TargetId {
    fn from(s: &str) -> Self {
        Self(s.to_owned())
    }
}

/// A strongly-typed identifier for one execution run of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for RunId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl std::str::FromStr for RunId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Storage targets
// ---------------------------------------------------------------------------

/// Connection configuration for a storage target, one closed variant per
/// storage kind. Only the sync invoker interprets the fields; the executor
/// passes the whole target through untouched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StorageKind {
    /// S3-compatible object store (AWS, R2, OSS, MinIO, ...).
    ObjectStore {
        endpoint: String,
        region: String,
        bucket: String,
        access_key_id: String,
        secret_access_key: String,
    },
    Sftp {
        host: String,
        port: u16,
        user: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        password: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        key_file: Option<PathBuf>,
    },
    Ftp {
        host: String,
        port: u16,
        user: String,
        password: String,
    },
    WebDav {
        url: String,
        user: String,
        password: String,
    },
    /// Raw key/value pairs copied verbatim into the sync tool's config
    /// section, for storage kinds without a dedicated variant.
    RawConfig { params: BTreeMap<String, String> },
}

impl StorageKind {
    /// Short label for log lines and table output.
    pub fn label(&self) -> &'static str {
        match self {
            StorageKind::ObjectStore { .. } => "object-store",
            StorageKind::Sftp { .. } => "sftp",
            StorageKind::Ftp { .. } => "ftp",
            StorageKind::WebDav { .. } => "webdav",
            StorageKind::RawConfig { .. } => "raw",
        }
    }
}

/// A configured remote storage destination, shared by many tasks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageTarget {
    pub id: TargetId,
    pub name: String,
    pub kind: StorageKind,
}

// ---------------------------------------------------------------------------
// Backup tasks
// ---------------------------------------------------------------------------

/// One (target, remote path) destination of a task. Bindings are unique per
/// task; their order is preserved for reporting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetBinding {
    pub target: TargetId,
    pub remote_path: String,
}

/// Encryption settings for a task. The key file holds the passphrase handed
/// to the external encryption tool; Caravan never stores key material in the
/// catalog itself.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Encryption {
    pub key_file: PathBuf,
}

/// A configured, possibly-scheduled backup definition.
///
/// The orchestration core treats a task as an immutable snapshot for the
/// duration of one run; edits take effect on the next trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BackupTask {
    pub id: TaskId,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// Absolute source path in the orchestrator's namespace.
    pub source_path: PathBuf,
    #[serde(default)]
    pub targets: Vec<TargetBinding>,
    /// 5-field cron expression; `None` means the task is manual-only.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub schedule: Option<String>,
    #[serde(default)]
    pub compress: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub encryption: Option<Encryption>,
    /// Number of artifacts to keep per target after a successful sync;
    /// `0` keeps everything.
    #[serde(default)]
    pub retention_count: u32,
    pub enabled: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Execution runs
// ---------------------------------------------------------------------------

/// Lifecycle of one execution run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Admitted, waiting for a worker slot.
    Pending,
    Running,
    Success,
    PartialFailure,
    Failed,
    Cancelled,
}

impl RunStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RunStatus::Success
                | RunStatus::PartialFailure
                | RunStatus::Failed
                | RunStatus::Cancelled
        )
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RunStatus::Pending => "pending",
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::PartialFailure => "partial-failure",
            RunStatus::Failed => "failed",
            RunStatus::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Outcome of the sync attempt against one target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TargetOutcome {
    Success,
    /// Transfer exceeded its deadline; retryable by the operator.
    Timeout,
    TransferFailed,
    ConfigInvalid,
    /// Never attempted — the run failed or was cancelled before reaching
    /// this target.
    Skipped,
}

impl fmt::Display for TargetOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TargetOutcome::Success => "success",
            TargetOutcome::Timeout => "timeout",
            TargetOutcome::TransferFailed => "transfer-failed",
            TargetOutcome::ConfigInvalid => "config-invalid",
            TargetOutcome::Skipped => "skipped",
        };
        f.write_str(s)
    }
}

/// Per-target record inside an [`ExecutionRun`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetResult {
    pub target: TargetId,
    pub remote_path: String,
    pub outcome: TargetOutcome,
    #[serde(default)]
    pub bytes_transferred: u64,
    /// The sync tool finished without reporting a byte count; the count
    /// above is `0` by convention, never a guess.
    #[serde(default)]
    pub size_unknown: bool,
    /// Bounded diagnostic text from the sync tool, verbatim.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    /// Non-fatal retention problems after a successful sync.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub retention_warnings: Vec<String>,
}

impl TargetResult {
    /// Placeholder result recorded at admission; updated in place as the
    /// executor reaches each target.
    pub fn skipped(binding: &TargetBinding) -> Self {
        Self {
            target: binding.target.clone(),
            remote_path: binding.remote_path.clone(),
            outcome: TargetOutcome::Skipped,
            bytes_transferred: 0,
            size_unknown: false,
            detail: None,
            retention_warnings: Vec::new(),
        }
    }
}

/// One execution attempt of a task.
///
/// Created at admission with one [`TargetOutcome::Skipped`] result per
/// binding, mutated only by the executor, terminal once `status` is.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRun {
    pub id: RunId,
    pub task_id: TaskId,
    pub started_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    /// Pre-fan-out stage failure detail (source, compression, encryption).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(default)]
    pub target_results: Vec<TargetResult>,
    /// Intermediate artifact on disk, if compression/encryption produced
    /// one; cleared once cleanup has removed it.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub artifact: Option<PathBuf>,
}

impl ExecutionRun {
    /// New pending run snapshotting the task's bindings as recorded at
    /// admission time. Targets added or removed later never affect it.
    pub fn admitted(task: &BackupTask) -> Self {
        Self {
            id: RunId::new(),
            task_id: task.id.clone(),
            started_at: Utc::now(),
            finished_at: None,
            status: RunStatus::Pending,
            error: None,
            target_results: task.targets.iter().map(TargetResult::skipped).collect(),
            artifact: None,
        }
    }

    /// Transition to a terminal status and stamp the finish time.
    pub fn finish(&mut self, status: RunStatus) {
        debug_assert!(status.is_terminal());
        self.status = status;
        self.finished_at = Some(Utc::now());
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn binding(target: &str) -> TargetBinding {
        TargetBinding {
            target: TargetId::from(target),
            remote_path: format!("backups/{target}"),
        }
    }

    fn task_with_targets(targets: Vec<TargetBinding>) -> BackupTask {
        let now = Utc::now();
        BackupTask {
            id: TaskId::from("nightly-etc"),
            name: "nightly-etc".to_string(),
            description: None,
            source_path: PathBuf::from("/etc"),
            targets,
            schedule: Some("0 2 * * *".to_string()),
            compress: true,
            encryption: None,
            retention_count: 7,
            enabled: true,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn newtype_display() {
        assert_eq!(TaskId::from("nightly").to_string(), "nightly");
        assert_eq!(TargetId::from("minio").to_string(), "minio");
    }

    #[test]
    fn run_id_parses_its_own_display() {
        let id = RunId::new();
        let parsed: RunId = id.to_string().parse().expect("parse run id");
        assert_eq!(parsed, id);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!RunStatus::Pending.is_terminal());
        assert!(!RunStatus::Running.is_terminal());
        assert!(RunStatus::Success.is_terminal());
        assert!(RunStatus::PartialFailure.is_terminal());
        assert!(RunStatus::Failed.is_terminal());
        assert!(RunStatus::Cancelled.is_terminal());
    }

    #[test]
    fn admitted_run_has_one_skipped_result_per_binding() {
        let task = task_with_targets(vec![binding("a"), binding("b")]);
        let run = ExecutionRun::admitted(&task);
        assert_eq!(run.status, RunStatus::Pending);
        assert_eq!(run.target_results.len(), 2);
        assert!(run
            .target_results
            .iter()
            .all(|r| r.outcome == TargetOutcome::Skipped));
        assert_eq!(run.target_results[0].target, TargetId::from("a"));
        assert_eq!(run.target_results[1].target, TargetId::from("b"));
    }

    #[test]
    fn storage_kind_yaml_roundtrip() {
        let target = StorageTarget {
            id: TargetId::from("r2"),
            name: "offsite".to_string(),
            kind: StorageKind::ObjectStore {
                endpoint: "accid.r2.cloudflarestorage.com".to_string(),
                region: "auto".to_string(),
                bucket: "backups".to_string(),
                access_key_id: "ak".to_string(),
                secret_access_key: "sk".to_string(),
            },
        };
        let yaml = serde_yaml::to_string(&target).expect("serialize");
        let back: StorageTarget = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back, target);
        assert!(yaml.contains("type: object_store"), "got: {yaml}");
    }

    #[test]
    fn task_yaml_roundtrip_preserves_binding_order() {
        let task = task_with_targets(vec![binding("b"), binding("a"), binding("c")]);
        let yaml = serde_yaml::to_string(&task).expect("serialize");
        let back: BackupTask = serde_yaml::from_str(&yaml).expect("deserialize");
        assert_eq!(back, task);
        let order: Vec<_> = back.targets.iter().map(|b| b.target.0.as_str()).collect();
        assert_eq!(order, vec!["b", "a", "c"]);
    }

    #[test]
    fn finish_stamps_terminal_state() {
        let task = task_with_targets(vec![binding("a")]);
        let mut run = ExecutionRun::admitted(&task);
        run.finish(RunStatus::Failed);
        assert_eq!(run.status, RunStatus::Failed);
        assert!(run.finished_at.is_some());
    }
}
