use std::path::{Path, PathBuf};

pub use caravan_core::catalog::caravan_root;

pub const DAEMON_LABEL: &str = "dev.caravan.daemon";

pub const DAEMON_STDOUT_LOG: &str = "daemon.log";
pub const DAEMON_STDERR_LOG: &str = "daemon-err.log";
pub const DAEMON_SOCKET: &str = "daemon.sock";

pub fn run_dir(home: &Path) -> PathBuf {
    caravan_root(home).join("run")
}

pub fn socket_path(home: &Path) -> PathBuf {
    run_dir(home).join(DAEMON_SOCKET)
}

pub fn logs_dir(home: &Path) -> PathBuf {
    caravan_root(home).join("logs")
}

pub fn stdout_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDOUT_LOG)
}

pub fn stderr_log_path(home: &Path) -> PathBuf {
    logs_dir(home).join(DAEMON_STDERR_LOG)
}

/// Scoped location for intermediate artifacts and ephemeral tool configs.
pub fn temp_dir(home: &Path) -> PathBuf {
    caravan_root(home).join("temp")
}
