//! # caravan-engine
//!
//! The orchestration engine: per-run task executor, artifact staging,
//! the scheduling actor with its single-flight and bounded-pool
//! guarantees, and the daemon runtime with its Unix-socket control
//! protocol.
//!
//! Call [`start_blocking`] to run the daemon in the foreground, or the
//! `request_*` protocol helpers to talk to a running one.

pub mod artifact;
pub mod error;
pub mod executor;
pub mod log_rotation;
pub mod paths;
pub mod protocol;
pub mod runtime;
pub mod scheduler;

pub use error::EngineError;
pub use executor::{execute_run, ExecutorDeps};
pub use protocol::{
    request_cancel, request_run, request_runs, request_status, request_stop, request_trigger,
};
pub use runtime::{run, start_blocking};
pub use scheduler::{EngineHandle, EngineStatus, Scheduler, TriggerOutcome};
