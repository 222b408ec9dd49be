//! CLI argument parsing for sessionstore

use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "sessionstore")]
#[command(author, version, about = "Inspect and manage chorus sessions", long_about = None)]
pub struct Cli {
    /// Sessions directory (default: <data-local>/chorus/sessions)
    #[arg(short, long)]
    pub dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

impl Cli {
    /// Sessions directory from the flag or the default location
    pub fn sessions_dir(&self) -> PathBuf {
        self.dir.clone().unwrap_or_else(default_sessions_dir)
    }
}

/// Default sessions directory shared with the chorus daemon
pub fn default_sessions_dir() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chorus")
        .join("sessions")
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// List sessions, most recently updated first
    List {
        /// Emit JSON instead of a table
        #[arg(long)]
        json: bool,
    },

    /// Show a session's turns
    Show {
        /// Session name
        #[arg(required = true)]
        name: String,

        /// Emit the raw session record as JSON
        #[arg(long)]
        json: bool,
    },

    /// Rename a session
    Rename {
        /// Current session name
        #[arg(required = true)]
        old: String,

        /// New session name
        #[arg(required = true)]
        new: String,
    },

    /// Delete a session
    Delete {
        /// Session name
        #[arg(required = true)]
        name: String,
    },

    /// List in-flight lock records
    Locks,
}
