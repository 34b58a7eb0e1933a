//! Caravan core library — domain types, catalog persistence, run log,
//! schedules, and deployment config.
//!
//! Public API surface:
//! - [`types`] — newtypes and domain structs
//! - [`error`] — [`CatalogError`]
//! - [`catalog`] — task/target definitions (load / save / list)
//! - [`runlog`] — execution-run history and crash-recovery reconciliation
//! - [`schedule`] — parsed cron expressions
//! - [`config`] — [`CaravanConfig`]

pub mod catalog;
pub mod config;
pub mod error;
pub mod runlog;
pub mod schedule;
pub mod types;

pub use config::CaravanConfig;
pub use error::CatalogError;
pub use schedule::{Schedule, ScheduleError};
pub use types::{
    BackupTask, Encryption, ExecutionRun, RunId, RunStatus, StorageKind, StorageTarget,
    TargetBinding, TargetId, TargetOutcome, TargetResult, TaskId,
};
