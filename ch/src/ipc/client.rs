//! IPC client used by the CLI

use std::path::PathBuf;
use std::time::Duration;

use eyre::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tracing::debug;

use super::get_socket_path;
use super::listener::MAX_MESSAGE_SIZE;
use super::messages::{DaemonMessage, DaemonResponse};
use crate::jobs::{JobRequest, StatusView, SubmissionAck};

/// Default timeout for IPC operations
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone)]
pub struct DaemonClient {
    socket_path: PathBuf,
    timeout: Duration,
}

impl Default for DaemonClient {
    fn default() -> Self {
        Self::new()
    }
}

impl DaemonClient {
    pub fn new() -> Self {
        Self::with_socket_path(get_socket_path())
    }

    /// Client for a custom socket path (for testing)
    pub fn with_socket_path(socket_path: PathBuf) -> Self {
        Self {
            socket_path,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn socket_exists(&self) -> bool {
        self.socket_path.exists()
    }

    /// Submit a request; the daemon answers as soon as the job is queued
    pub async fn submit(&self, request: JobRequest) -> Result<SubmissionAck> {
        debug!(perspectives = request.perspectives, "DaemonClient: submitting");
        match self.send_message(DaemonMessage::Submit { request }).await? {
            DaemonResponse::Accepted { ack } => Ok(ack),
            DaemonResponse::Error { message } => Err(eyre::eyre!("{}", message)),
            other => Err(eyre::eyre!("Unexpected response: {:?}", other)),
        }
    }

    pub async fn status(&self, session_name: &str, turn_number: u32) -> Result<StatusView> {
        let msg = DaemonMessage::Status {
            session_name: session_name.to_string(),
            turn_number,
        };
        match self.send_message(msg).await? {
            DaemonResponse::Status { view } => Ok(view),
            DaemonResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            other => Err(eyre::eyre!("Unexpected response: {:?}", other)),
        }
    }

    /// Check if daemon is alive and get its version
    pub async fn ping(&self) -> Result<String> {
        debug!("DaemonClient: pinging daemon");
        match self.send_message(DaemonMessage::Ping).await? {
            DaemonResponse::Pong { version } => Ok(version),
            DaemonResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            other => Err(eyre::eyre!("Unexpected response: {:?}", other)),
        }
    }

    pub async fn shutdown(&self) -> Result<()> {
        debug!("DaemonClient: requesting daemon shutdown");
        match self.send_message(DaemonMessage::Shutdown).await? {
            DaemonResponse::Ok => Ok(()),
            DaemonResponse::Error { message } => Err(eyre::eyre!("Daemon error: {}", message)),
            other => Err(eyre::eyre!("Unexpected response: {:?}", other)),
        }
    }

    async fn send_message(&self, msg: DaemonMessage) -> Result<DaemonResponse> {
        debug!(?self.socket_path, "DaemonClient: sending message");
        let mut stream = tokio::time::timeout(self.timeout, UnixStream::connect(&self.socket_path))
            .await
            .context("Connection timeout")?
            .context("Failed to connect to daemon socket")?;

        let msg_json = serde_json::to_string(&msg).context("Failed to serialize message")?;
        if msg_json.len() > MAX_MESSAGE_SIZE {
            return Err(eyre::eyre!("Message too large: {} bytes", msg_json.len()));
        }

        tokio::time::timeout(self.timeout, async {
            stream
                .write_all(msg_json.as_bytes())
                .await
                .context("Failed to write message")?;
            stream.write_all(b"\n").await.context("Failed to write newline")?;
            stream.flush().await.context("Failed to flush stream")?;
            Ok::<_, eyre::Error>(())
        })
        .await
        .context("Write timeout")??;

        let mut reader = BufReader::new(&mut stream);
        let mut line = String::new();
        tokio::time::timeout(self.timeout, reader.read_line(&mut line))
            .await
            .context("Read timeout")?
            .context("Failed to read response")?;

        let response: DaemonResponse = serde_json::from_str(line.trim()).context("Failed to parse daemon response")?;
        debug!(?response, "DaemonClient: received response");
        Ok(response)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_with_custom_path() {
        let path = PathBuf::from("/custom/path/chorus.sock");
        let client = DaemonClient::with_socket_path(path.clone()).with_timeout(Duration::from_secs(1));
        assert_eq!(client.socket_path, path);
        assert_eq!(client.timeout, Duration::from_secs(1));
        assert!(!client.socket_exists());
    }

    #[tokio::test]
    async fn test_connect_fails_without_daemon() {
        let temp = tempfile::TempDir::new().unwrap();
        let client = DaemonClient::with_socket_path(temp.path().join("missing.sock"));
        assert!(client.ping().await.is_err());
    }
}
