//! Daemon side of the IPC socket

use std::path::{Path, PathBuf};

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tracing::{debug, info, warn};

use super::messages::{DaemonMessage, DaemonResponse};
use crate::daemon::VERSION;
use crate::service::ChorusService;

/// Largest accepted request line; prompts can be long
pub const MAX_MESSAGE_SIZE: usize = 1024 * 1024;

/// Bind the socket, replacing a stale one from a previous run
pub fn create_listener_at(socket_path: &Path) -> Result<(UnixListener, PathBuf)> {
    debug!(?socket_path, "create_listener: creating IPC socket");
    if let Some(parent) = socket_path.parent() {
        std::fs::create_dir_all(parent).context("Failed to create socket directory")?;
    }

    if socket_path.exists() {
        debug!(?socket_path, "create_listener: removing stale socket");
        std::fs::remove_file(socket_path).context("Failed to remove stale socket")?;
    }

    let listener = UnixListener::bind(socket_path).context("Failed to bind IPC socket")?;
    Ok((listener, socket_path.to_path_buf()))
}

/// Remove the socket file on shutdown
pub fn cleanup_socket(socket_path: &Path) {
    if socket_path.exists() {
        debug!(?socket_path, "cleanup_socket: removing socket file");
        if let Err(e) = std::fs::remove_file(socket_path) {
            warn!(?socket_path, error = %e, "Failed to remove socket file");
        }
    }
}

pub async fn read_message(stream: &mut UnixStream) -> Result<DaemonMessage> {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();
    let bytes_read = reader
        .read_line(&mut line)
        .await
        .context("Failed to read IPC message")?;

    if bytes_read > MAX_MESSAGE_SIZE {
        return Err(eyre::eyre!("Message too large: {} bytes", bytes_read));
    }
    if line.is_empty() {
        return Err(eyre::eyre!("Empty message received"));
    }

    let msg: DaemonMessage = serde_json::from_str(line.trim()).context("Failed to parse IPC message")?;
    debug!(?msg, "read_message: parsed message");
    Ok(msg)
}

pub async fn send_response(stream: &mut UnixStream, response: &DaemonResponse) -> Result<()> {
    let json = serde_json::to_string(response).context("Failed to serialize response")?;
    stream.write_all(json.as_bytes()).await.context("Failed to write response")?;
    stream.write_all(b"\n").await.context("Failed to write newline")?;
    stream.flush().await.context("Failed to flush response")?;
    Ok(())
}

/// Answer one message; true when the peer asked the daemon to stop
pub fn dispatch(service: &ChorusService, msg: DaemonMessage) -> (DaemonResponse, bool) {
    match msg {
        DaemonMessage::Submit { request } => match service.submit(request) {
            Ok(ack) => (DaemonResponse::Accepted { ack }, false),
            Err(e) => (DaemonResponse::Error { message: e.to_string() }, false),
        },
        DaemonMessage::Status {
            session_name,
            turn_number,
        } => (
            DaemonResponse::Status {
                view: service.status(&session_name, turn_number),
            },
            false,
        ),
        DaemonMessage::Ping => (
            DaemonResponse::Pong {
                version: VERSION.to_string(),
            },
            false,
        ),
        DaemonMessage::Shutdown => {
            info!("Shutdown requested over IPC");
            (DaemonResponse::Ok, true)
        }
    }
}

/// Serve one connection; true when it requested shutdown
pub async fn handle_connection(mut stream: UnixStream, service: &ChorusService) -> Result<bool> {
    let (response, shutdown) = match read_message(&mut stream).await {
        Ok(msg) => dispatch(service, msg),
        Err(e) => (DaemonResponse::Error { message: e.to_string() }, false),
    };
    send_response(&mut stream, &response).await?;
    Ok(shutdown)
}
