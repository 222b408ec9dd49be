//! Unix-socket IPC between the CLI and the daemon
//!
//! One JSON message per line, one request per connection.

use std::path::PathBuf;

pub mod client;
pub mod listener;
pub mod messages;

pub use client::DaemonClient;
pub use messages::{DaemonMessage, DaemonResponse};

/// Socket path, next to the daemon state file
pub fn get_socket_path() -> PathBuf {
    dirs::runtime_dir()
        .or_else(dirs::data_local_dir)
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join("chorus")
        .join("chorus.sock")
}
