//! CLI command definitions

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

use crate::jobs::JobRequest;
use crate::pipeline::OutputFormat;

/// Log file location, shared by the daemon and job processes
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("chorus")
        .join("logs")
        .join("chorus.log")
}

/// Chorus - multi-perspective analysis orchestrator
#[derive(Parser)]
#[command(
    name = "chorus",
    about = "Expand a question into perspectives, analyze each, and synthesize the result",
    version = env!("CARGO_PKG_VERSION"),
    after_help = "Logs are written to: ~/.local/share/chorus/logs/chorus.log"
)]
pub struct Cli {
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Log level (trace, debug, info, warn, error)")]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Manage the background daemon
    Daemon {
        #[command(subcommand)]
        command: DaemonCommand,
    },

    /// Queue a turn with the daemon and print the acknowledgement
    Submit {
        #[command(flatten)]
        request: RequestArgs,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Show the status of one turn
    Status {
        session: String,

        #[arg(default_value = "1")]
        turn: u32,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Run a turn in the foreground and print the result
    Run {
        #[command(flatten)]
        request: RequestArgs,

        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Internal: run as the daemon process (used by `daemon start`)
    #[command(hide = true)]
    RunDaemon,

    /// Internal: execute one queued job file
    #[command(hide = true)]
    RunJob { job_file: PathBuf },
}

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Start the daemon in the background
    Start {
        /// Run in the foreground instead of forking
        #[arg(long)]
        foreground: bool,
    },

    /// Stop the running daemon
    Stop,

    /// Show whether the daemon is running
    Status,

    /// Check that the daemon answers on its socket
    Ping,
}

/// Flags shared by `submit` and `run`
#[derive(Args, Debug, Clone)]
pub struct RequestArgs {
    /// The question to analyze
    pub prompt: String,

    /// Number of perspectives; 0 answers with a single call
    #[arg(short, long, default_value = "0")]
    pub perspectives: u32,

    /// Synthesize the perspectives into one answer
    #[arg(long)]
    pub summarize: bool,

    #[arg(short, long)]
    pub model: Option<String>,

    /// Stop after expansion and show the instructions
    #[arg(long)]
    pub dry_run: bool,

    /// Run participants one at a time
    #[arg(long)]
    pub serial: bool,

    /// Continue an existing session
    #[arg(short, long)]
    pub session: Option<String>,

    /// Let participants fetch URLs and read reference files
    #[arg(long)]
    pub tools: bool,
}

impl From<RequestArgs> for JobRequest {
    fn from(args: RequestArgs) -> Self {
        JobRequest {
            prompt: args.prompt,
            perspectives: args.perspectives,
            summarize: args.summarize,
            model: args.model,
            dry_run: args.dry_run,
            serial_fan_out: args.serial.then_some(true),
            session_name: args.session,
            tools: args.tools,
        }
    }
}
