//! # caravan-transfer
//!
//! Per-target transfer machinery: the execution-boundary path translator,
//! the bounded cancellable process runner, the rclone-backed sync invoker,
//! and retention enforcement.
//!
//! The executor depends only on the [`TargetTransfer`] trait; tests swap in
//! fakes, production wires up [`RcloneInvoker`].

pub mod boundary;
pub mod error;
pub mod invoker;
pub mod process;
pub mod rclone;
pub mod retention;

pub use boundary::BoundaryMap;
pub use error::TransferError;
pub use invoker::{RemoteEntry, SyncOutcome, TargetTransfer};
pub use process::{run_captured, ProcessOutcome, DIAG_LIMIT};
pub use rclone::RcloneInvoker;
pub use retention::{enforce, RetentionOutcome};
