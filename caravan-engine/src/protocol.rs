use std::io::{BufRead, BufReader, Write};
use std::os::unix::net::UnixStream;
use std::path::Path;
use std::thread::sleep;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{io_err, EngineError};
use crate::paths::socket_path;

/// JSON newline-delimited request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineRequest {
    pub cmd: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run: Option<String>,
}

impl EngineRequest {
    pub fn bare(cmd: &str) -> Self {
        Self {
            cmd: cmd.to_string(),
            task: None,
            run: None,
        }
    }
}

/// JSON newline-delimited response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineResponse {
    pub ok: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl EngineResponse {
    pub fn ok(data: Value) -> Self {
        Self {
            ok: true,
            data: Some(data),
            error: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(message.into()),
        }
    }
}

/// Send one JSON request to the daemon socket and return one response.
pub fn send_request(home: &Path, request: &EngineRequest) -> Result<EngineResponse, EngineError> {
    let socket = socket_path(home);
    if !socket.exists() {
        return Err(EngineError::DaemonNotRunning { socket });
    }

    let mut stream = UnixStream::connect(&socket).map_err(|err| {
        if matches!(
            err.kind(),
            std::io::ErrorKind::NotFound
                | std::io::ErrorKind::ConnectionRefused
                | std::io::ErrorKind::ConnectionReset
        ) {
            EngineError::DaemonNotRunning {
                socket: socket.clone(),
            }
        } else {
            io_err(&socket, err)
        }
    })?;

    let payload = serde_json::to_string(request)?;
    stream
        .write_all(payload.as_bytes())
        .map_err(|e| io_err(&socket, e))?;
    stream.write_all(b"\n").map_err(|e| io_err(&socket, e))?;
    stream.flush().map_err(|e| io_err(&socket, e))?;

    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let read = reader
        .read_line(&mut line)
        .map_err(|e| io_err(&socket, e))?;
    if read == 0 {
        return Err(EngineError::Protocol(
            "daemon closed connection before responding".to_string(),
        ));
    }

    let response: EngineResponse = serde_json::from_str(line.trim_end())?;
    Ok(response)
}

pub fn request_status(home: &Path) -> Result<Value, EngineError> {
    let request = EngineRequest::bare("status");

    let mut last_not_running: Option<EngineError> = None;
    for attempt in 0..5 {
        match send_request(home, &request) {
            Ok(response) => return response_into_data(response),
            Err(err @ EngineError::DaemonNotRunning { .. }) => {
                last_not_running = Some(err);
                if attempt < 4 {
                    sleep(Duration::from_millis(100));
                    continue;
                }
            }
            Err(err) => return Err(err),
        }
    }

    Err(last_not_running.unwrap_or_else(|| {
        EngineError::Protocol("daemon status retry loop exited unexpectedly".to_string())
    }))
}

pub fn request_stop(home: &Path) -> Result<(), EngineError> {
    let response = send_request(home, &EngineRequest::bare("stop"))?;
    response_into_data(response).map(|_| ())
}

/// Manual trigger. The data distinguishes a started run from the
/// single-flight refusal:
/// `{"outcome": "started", "run": "<id>"}` or `{"outcome": "already-running"}`.
pub fn request_trigger(home: &Path, task: String) -> Result<Value, EngineError> {
    let response = send_request(
        home,
        &EngineRequest {
            cmd: "trigger".to_string(),
            task: Some(task),
            run: None,
        },
    )?;
    response_into_data(response)
}

pub fn request_runs(home: &Path, task: String) -> Result<Value, EngineError> {
    let response = send_request(
        home,
        &EngineRequest {
            cmd: "runs".to_string(),
            task: Some(task),
            run: None,
        },
    )?;
    response_into_data(response)
}

pub fn request_run(home: &Path, run: String) -> Result<Value, EngineError> {
    let response = send_request(
        home,
        &EngineRequest {
            cmd: "run".to_string(),
            task: None,
            run: Some(run),
        },
    )?;
    response_into_data(response)
}

pub fn request_cancel(home: &Path, run: String) -> Result<Value, EngineError> {
    let response = send_request(
        home,
        &EngineRequest {
            cmd: "cancel".to_string(),
            task: None,
            run: Some(run),
        },
    )?;
    response_into_data(response)
}

fn response_into_data(response: EngineResponse) -> Result<Value, EngineError> {
    if response.ok {
        Ok(response.data.unwrap_or(Value::Null))
    } else {
        Err(EngineError::Protocol(
            response
                .error
                .unwrap_or_else(|| "unknown daemon error".to_string()),
        ))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
