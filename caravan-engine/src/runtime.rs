//! Daemon runtime: wires the scheduler actor, the Unix-socket control
//! server, log rotation, and signal handling under one broadcast shutdown.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde_json::{json, Value};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::unix::OwnedWriteHalf;
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::broadcast;

use caravan_core::types::{RunId, TaskId};
use caravan_core::{catalog, config, runlog};
use caravan_transfer::{BoundaryMap, RcloneInvoker};

use crate::error::{io_err, EngineError};
use crate::executor::ExecutorDeps;
use crate::log_rotation;
use crate::paths::{self, run_dir, socket_path, temp_dir, DAEMON_LABEL};
use crate::protocol::{EngineRequest, EngineResponse};
use crate::scheduler::{EngineHandle, Scheduler, TriggerOutcome};

/// Start the daemon runtime and block the current thread until it exits.
pub fn start_blocking(home: &Path) -> Result<(), EngineError> {
    init_tracing();
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| io_err("tokio-runtime", e))?;
    runtime.block_on(run(home.to_path_buf()))
}

/// Run the daemon runtime.
pub async fn run(home: PathBuf) -> Result<(), EngineError> {
    ensure_runtime_dirs(&home)?;

    let config = config::load_config_at(&home)?;

    // Crash recovery before anything can trigger: a run left non-terminal
    // by a previous process lifetime is failed, never resumed.
    let reconciled = runlog::reconcile_interrupted_at(&home)?;
    if reconciled > 0 {
        tracing::warn!(
            count = reconciled,
            "reconciled runs interrupted by a previous shutdown",
        );
    }

    let temp = temp_dir(&home);
    let deps = Arc::new(ExecutorDeps {
        home: home.clone(),
        boundary: BoundaryMap::from_config(config.boundary_root.as_deref()),
        transfer: Arc::new(RcloneInvoker::new(&config, temp.clone())),
        temp_dir: temp,
        config,
    });

    let tasks = catalog::list_tasks_at(&home)?;
    tracing::info!(tasks = tasks.len(), "catalog loaded");
    let scheduler = Scheduler::new(deps.clone(), &tasks);

    let (handle, cmd_rx) = EngineHandle::channel(64);
    let (shutdown_tx, _) = broadcast::channel::<()>(16);
    let started_at_unix = unix_seconds_now();

    let scheduler_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let result = scheduler.run(cmd_rx, shutdown.subscribe()).await;
            let _ = shutdown.send(());
            result
        })
    };

    let socket_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        let handle = handle.clone();
        tokio::spawn(async move {
            let result = socket_server_task(
                home,
                handle,
                shutdown.clone(),
                shutdown.subscribe(),
                started_at_unix,
            )
            .await;
            let _ = shutdown.send(());
            result
        })
    };

    let rotation_handle = {
        let shutdown = shutdown_tx.clone();
        let home = home.clone();
        tokio::spawn(async move { log_rotation_task(home, shutdown.subscribe()).await })
    };

    let signal_handle = {
        let shutdown = shutdown_tx.clone();
        tokio::spawn(async move {
            let mut shutdown_rx = shutdown.subscribe();
            tokio::select! {
                _ = shutdown_rx.recv() => Ok(()),
                signal = tokio::signal::ctrl_c() => {
                    match signal {
                        Ok(()) => {
                            tracing::info!("received ctrl-c, shutting down daemon");
                            let _ = shutdown.send(());
                            Ok(())
                        }
                        Err(err) => Err(EngineError::Protocol(format!(
                            "ctrl-c handler failed: {err}"
                        ))),
                    }
                }
            }
        })
    };

    let (scheduler_result, socket_result, rotation_result, signal_result) = tokio::join!(
        scheduler_handle,
        socket_handle,
        rotation_handle,
        signal_handle
    );

    handle_join("scheduler", scheduler_result)?;
    handle_join("socket_server", socket_result)?;
    handle_join("log_rotation", rotation_result)?;
    handle_join("signal_handler", signal_result)?;
    Ok(())
}

async fn socket_server_task(
    home: PathBuf,
    handle: EngineHandle,
    shutdown_tx: broadcast::Sender<()>,
    mut shutdown_rx: broadcast::Receiver<()>,
    started_at_unix: u64,
) -> Result<(), EngineError> {
    let socket = socket_path(&home);
    prepare_socket_for_bind(&socket)?;

    let listener = UnixListener::bind(&socket).map_err(|e| io_err(&socket, e))?;
    set_socket_permissions(&socket)?;
    tracing::info!(socket = %socket.display(), "control socket ready");

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            accepted = listener.accept() => {
                let (stream, _) = accepted.map_err(|e| io_err(&socket, e))?;
                let home = home.clone();
                let handle = handle.clone();
                let shutdown_tx = shutdown_tx.clone();
                tokio::spawn(async move {
                    if let Err(err) =
                        handle_socket_client(stream, home, handle, shutdown_tx, started_at_unix)
                            .await
                    {
                        tracing::error!(error = %err, "socket client error");
                    }
                });
            }
        }
    }

    if socket.exists() {
        let _ = fs::remove_file(&socket);
    }
    Ok(())
}

async fn handle_socket_client(
    stream: UnixStream,
    home: PathBuf,
    handle: EngineHandle,
    shutdown_tx: broadcast::Sender<()>,
    started_at_unix: u64,
) -> Result<(), EngineError> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    while let Some(line) = lines
        .next_line()
        .await
        .map_err(|e| io_err("daemon socket read", e))?
    {
        if line.trim().is_empty() {
            continue;
        }

        let request: Result<EngineRequest, _> = serde_json::from_str(&line);
        let request = match request {
            Ok(request) => request,
            Err(err) => {
                write_response(
                    &mut writer,
                    &EngineResponse::error(format!("invalid request JSON: {err}")),
                )
                .await?;
                continue;
            }
        };

        let stop = request.cmd == "stop";
        let response =
            dispatch_request(request, &home, &handle, &shutdown_tx, started_at_unix).await;
        write_response(&mut writer, &response).await?;
        if stop {
            break;
        }
    }

    Ok(())
}

/// One request → one response. Factored out of the client loop so the
/// protocol surface is testable without a socket.
async fn dispatch_request(
    request: EngineRequest,
    home: &Path,
    handle: &EngineHandle,
    shutdown_tx: &broadcast::Sender<()>,
    started_at_unix: u64,
) -> EngineResponse {
    match request.cmd.as_str() {
        "status" => match handle.status().await {
            Ok(status) => EngineResponse::ok(build_status_payload(home, &status, started_at_unix)),
            Err(err) => EngineResponse::error(err.to_string()),
        },
        "trigger" => {
            let Some(task) = request.task else {
                return EngineResponse::error("trigger requires a task");
            };
            match handle.trigger(TaskId::from(task.clone())).await {
                Ok(TriggerOutcome::Started(run)) => EngineResponse::ok(json!({
                    "outcome": "started",
                    "task": task,
                    "run": run.to_string(),
                })),
                Ok(TriggerOutcome::AlreadyRunning) => EngineResponse::ok(json!({
                    "outcome": "already-running",
                    "task": task,
                })),
                Ok(TriggerOutcome::Rejected(reason)) => EngineResponse::error(reason),
                Err(err) => EngineResponse::error(err.to_string()),
            }
        }
        "runs" => {
            let Some(task) = request.task else {
                return EngineResponse::error("runs requires a task");
            };
            match runlog::list_runs_at(home, &TaskId::from(task)) {
                Ok(runs) => match serde_json::to_value(&runs) {
                    Ok(value) => EngineResponse::ok(value),
                    Err(err) => EngineResponse::error(err.to_string()),
                },
                Err(err) => EngineResponse::error(err.to_string()),
            }
        }
        "run" => {
            let Some(run) = request.run else {
                return EngineResponse::error("run requires a run id");
            };
            let run_id: RunId = match run.parse() {
                Ok(id) => id,
                Err(err) => return EngineResponse::error(format!("invalid run id: {err}")),
            };
            match runlog::get_run_at(home, &run_id) {
                Ok(run) => match serde_json::to_value(&run) {
                    Ok(value) => EngineResponse::ok(value),
                    Err(err) => EngineResponse::error(err.to_string()),
                },
                Err(err) => EngineResponse::error(err.to_string()),
            }
        }
        "cancel" => {
            let Some(run) = request.run else {
                return EngineResponse::error("cancel requires a run id");
            };
            let run_id: RunId = match run.parse() {
                Ok(id) => id,
                Err(err) => return EngineResponse::error(format!("invalid run id: {err}")),
            };
            match handle.cancel_run(run_id).await {
                Ok(cancelled) => EngineResponse::ok(json!({ "cancelled": cancelled })),
                Err(err) => EngineResponse::error(err.to_string()),
            }
        }
        "stop" => {
            let _ = shutdown_tx.send(());
            EngineResponse::ok(json!({ "stopping": true }))
        }
        other => EngineResponse::error(format!("unknown command '{other}'")),
    }
}

fn build_status_payload(
    home: &Path,
    status: &crate::scheduler::EngineStatus,
    started_at_unix: u64,
) -> Value {
    json!({
        "running": true,
        "label": DAEMON_LABEL,
        "started_at_unix": started_at_unix,
        "active_runs": status.active_runs,
        "queued_runs": status.queued_runs,
        "running_tasks": status.running_tasks,
        "scheduled": status.scheduled,
        "socket": socket_path(home).display().to_string(),
    })
}

async fn log_rotation_task(
    home: PathBuf,
    mut shutdown_rx: broadcast::Receiver<()>,
) -> Result<(), EngineError> {
    let mut interval = tokio::time::interval(Duration::from_secs(60));
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
    interval.tick().await; // consume the first immediate tick

    loop {
        tokio::select! {
            _ = shutdown_rx.recv() => break,
            _ = interval.tick() => {
                let home = home.clone();
                tokio::task::spawn_blocking(move || {
                    log_rotation::rotate_daemon_logs(&home);
                })
                .await
                .ok(); // rotation errors are logged inside; never crash the daemon
            }
        }
    }
    Ok(())
}

fn ensure_runtime_dirs(home: &Path) -> Result<(), EngineError> {
    for dir in [
        paths::caravan_root(home),
        temp_dir(home),
        paths::logs_dir(home),
        run_dir(home),
        runlog::runs_dir_at(home),
    ] {
        if !dir.exists() {
            fs::create_dir_all(&dir).map_err(|e| io_err(&dir, e))?;
        }
    }
    Ok(())
}

fn prepare_socket_for_bind(socket: &Path) -> Result<(), EngineError> {
    if !socket.exists() {
        return Ok(());
    }

    match std::os::unix::net::UnixStream::connect(socket) {
        Ok(_) => Err(EngineError::Protocol(format!(
            "daemon socket already in use: {}",
            socket.display()
        ))),
        Err(err) => {
            tracing::warn!(
                socket = %socket.display(),
                error = %err,
                "removing stale daemon socket before bind",
            );
            match fs::remove_file(socket) {
                Ok(()) => Ok(()),
                Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
                Err(err) => Err(io_err(socket, err)),
            }
        }
    }
}

fn handle_join(
    task: &str,
    result: Result<Result<(), EngineError>, tokio::task::JoinError>,
) -> Result<(), EngineError> {
    match result {
        Ok(inner) => inner,
        Err(err) => Err(EngineError::Protocol(format!(
            "{task} task join failure: {err}"
        ))),
    }
}

fn unix_seconds_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

fn init_tracing() {
    use tracing_subscriber::{fmt, EnvFilter};

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = fmt().with_env_filter(filter).with_target(false).try_init();
}

#[cfg(unix)]
fn set_socket_permissions(path: &Path) -> Result<(), EngineError> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600)).map_err(|e| io_err(path, e))
}

#[cfg(not(unix))]
fn set_socket_permissions(_path: &Path) -> Result<(), EngineError> {
    Ok(())
}

async fn write_response(
    writer: &mut OwnedWriteHalf,
    response: &EngineResponse,
) -> Result<(), EngineError> {
    let payload = serde_json::to_string(response)?;
    writer
        .write_all(payload.as_bytes())
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .write_all(b"\n")
        .await
        .map_err(|e| io_err("daemon socket write", e))?;
    writer
        .flush()
        .await
        .map_err(|e| io_err("daemon socket flush", e))?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
