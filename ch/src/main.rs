use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chorus::cli::{Cli, Command, DaemonCommand, RequestArgs, get_log_path};
use chorus::config::{Config, ExecutionKind};
use chorus::daemon::{DaemonManager, STOP_GRACE, VERSION};
use chorus::http;
use chorus::ipc::{self, DaemonClient};
use chorus::jobs::{InProcessRunner, Job, JobError, JobRequest, JobRunner, ProcessRunner, STAGE_FAILURE_EXIT, StatusView,
    SubmissionAck, execute_job};
use chorus::llm::ConfigLlmProvider;
use chorus::pipeline::{OutputFormat, render};
use chorus::service::ChorusService;
use clap::{CommandFactory, Parser};
use colored::*;
use eyre::{Context, Result};
use sessionstore::SessionStore;
use tracing::{error, info, warn};

/// Route tracing to the shared log file
///
/// Level priority: `--log-level`, then the config's `log-level`, then INFO.
/// The file is appended to since job processes write to it too.
fn setup_logging(cli_level: Option<&str>, config_level: Option<&str>) -> Result<()> {
    let log_path = get_log_path();
    if let Some(log_dir) = log_path.parent() {
        fs::create_dir_all(log_dir).context("Failed to create log directory")?;
    }

    let level = cli_level.or(config_level).unwrap_or("info");
    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_path)
        .context("Failed to open log file")?;

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("Invalid log level")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(filter)
        .init();

    info!(%level, pid = std::process::id(), "Logging initialized");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(
        provider = %config.llm.provider,
        model = %config.pipeline.default_model,
        data_dir = %config.storage.data_dir.display(),
        "chorus loaded config"
    );

    match cli.command {
        Some(Command::Daemon { command }) => match command {
            DaemonCommand::Start { foreground } => cmd_start(config, cli.config, foreground).await,
            DaemonCommand::Stop => cmd_stop().await,
            DaemonCommand::Status => cmd_daemon_status(),
            DaemonCommand::Ping => cmd_ping().await,
        },
        Some(Command::Submit { request, format }) => cmd_submit(request, format).await,
        Some(Command::Status { session, turn, format }) => cmd_status(&config, &session, turn, format),
        Some(Command::Run { request, format }) => cmd_run(config, request, format).await,
        Some(Command::RunDaemon) => run_daemon(config, cli.config).await,
        Some(Command::RunJob { job_file }) => cmd_run_job(&config, &job_file).await,
        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}

async fn cmd_start(config: Config, config_path: Option<PathBuf>, foreground: bool) -> Result<()> {
    if foreground {
        println!("Running daemon in the foreground (Ctrl+C to stop)");
        return run_daemon(config, config_path).await;
    }

    let manager = DaemonManager::new();
    let pid = manager.start(config_path.as_deref())?;
    println!("{} Daemon started (PID {})", "✓".green(), pid);
    Ok(())
}

async fn cmd_stop() -> Result<()> {
    let manager = DaemonManager::new();
    if !manager.is_running() {
        println!("Daemon is not running");
        return Ok(());
    }
    manager.stop(STOP_GRACE)?;
    println!("{} Daemon stopped", "✓".green());
    Ok(())
}

fn cmd_daemon_status() -> Result<()> {
    let status = DaemonManager::new().status();
    match &status.record {
        Some(record) => {
            println!("Daemon: {} (PID {}, version {})", "running".green(), record.pid, record.version);
            if !record.version_matches() {
                println!(
                    "  {} daemon version differs from this binary ({}); restart it",
                    "!".yellow(),
                    VERSION
                );
            }
        }
        None => println!("Daemon: {}", "stopped".red()),
    }
    println!("State file: {}", status.state_file.display());
    Ok(())
}

async fn cmd_ping() -> Result<()> {
    let version = DaemonClient::new().ping().await?;
    println!("{} Daemon answered (version {})", "✓".green(), version);
    Ok(())
}

async fn cmd_submit(args: RequestArgs, format: OutputFormat) -> Result<()> {
    let client = DaemonClient::new();
    if !client.socket_exists() {
        return Err(eyre::eyre!("Daemon is not running. Start it with `chorus daemon start`."));
    }

    let ack = client.submit(JobRequest::from(args)).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&ack)?),
        OutputFormat::Text => print_ack(&ack),
    }
    Ok(())
}

fn print_ack(ack: &SubmissionAck) {
    println!(
        "{} {} turn {}",
        "Accepted".green().bold(),
        ack.session_name.cyan(),
        ack.turn_number
    );
    println!("  check:    {}", ack.check_url);
    println!("  estimate: ~{}s", ack.estimated_seconds);
    println!(
        "  {}",
        format!("chorus status {} {}", ack.session_name, ack.turn_number).dimmed()
    );
}

fn cmd_status(config: &Config, session: &str, turn: u32, format: OutputFormat) -> Result<()> {
    let store = SessionStore::open(config.storage.sessions_dir()).context("Failed to open session store")?;
    let view = chorus::jobs::poll(&store, session, turn);

    if format == OutputFormat::Json {
        println!("{}", serde_json::to_string_pretty(&view)?);
        return Ok(());
    }

    match view {
        StatusView::Running { completed_turns } => {
            println!(
                "{} {} turn {} ({} turns complete)",
                "running".yellow(),
                session,
                turn,
                completed_turns
            );
        }
        StatusView::Complete { result } => println!("{}", render(&result, OutputFormat::Text)?),
        StatusView::Error { message } => println!("{} {}", "error".red(), message),
    }
    Ok(())
}

async fn cmd_run(config: Config, args: RequestArgs, format: OutputFormat) -> Result<()> {
    let llm = ConfigLlmProvider::new(config.llm.clone());
    let service = ChorusService::open(Arc::new(config))?;
    let turn = service.run_now(JobRequest::from(args), &llm).await?;
    println!("{}", render(&turn, format)?);
    Ok(())
}

/// Execute one queued job file; the worker that spawned us reads our exit code
async fn cmd_run_job(config: &Config, job_file: &Path) -> Result<()> {
    let content = fs::read_to_string(job_file).context(format!("Failed to read job file {}", job_file.display()))?;
    let job: Job = serde_json::from_str(&content).context("Failed to parse job file")?;
    info!(job_id = %job.id, session = %job.session_name, turn = job.turn_number, "run-job starting");

    let store = SessionStore::open(config.storage.sessions_dir()).context("Failed to open session store")?;
    let llm = ConfigLlmProvider::new(config.llm.clone());

    match execute_job(&job, config, &llm, &store).await {
        Ok(turn) => {
            info!(job_id = %job.id, cost = turn.total_cost.usd, "run-job finished");
            Ok(())
        }
        Err(JobError::Stage(e)) => {
            eprintln!("{}", e);
            std::process::exit(STAGE_FAILURE_EXIT);
        }
        Err(e) => Err(e.into()),
    }
}

async fn run_daemon(config: Config, config_path: Option<PathBuf>) -> Result<()> {
    info!("Daemon starting...");

    let manager = DaemonManager::new();
    manager.register_self()?;

    let config = Arc::new(config);
    let service = Arc::new(ChorusService::open(config.clone())?);

    let runner: Arc<dyn JobRunner> = match config.jobs.execution {
        ExecutionKind::Process => {
            let runner = ProcessRunner::current_exe(config_path, config.storage.jobs_dir())
                .context("Failed to locate chorus executable")?;
            Arc::new(runner)
        }
        ExecutionKind::InProcess => Arc::new(InProcessRunner::new(
            config.clone(),
            Arc::new(ConfigLlmProvider::new(config.llm.clone())),
            service.store().clone(),
        )),
    };
    let pool = service.start_workers(runner)?;

    let (listener, socket_path) = ipc::listener::create_listener_at(&ipc::get_socket_path())?;
    info!(socket = %socket_path.display(), "IPC listening");

    let (http_stop_tx, http_stop_rx) = tokio::sync::oneshot::channel::<()>();
    let http_handle = if config.server.enabled {
        let listen = config.server.listen.clone();
        let service = service.clone();
        Some(tokio::spawn(async move {
            let shutdown = async move {
                let _ = http_stop_rx.await;
            };
            if let Err(e) = http::serve(&listen, service, shutdown).await {
                error!(error = %e, "HTTP server error");
            }
        }))
    } else {
        None
    };

    info!("Daemon running. Press Ctrl+C to stop.");

    #[cfg(unix)]
    {
        use tokio::signal::unix::{SignalKind, signal};

        let mut sigint = signal(SignalKind::interrupt())?;
        let mut sigterm = signal(SignalKind::terminate())?;

        loop {
            tokio::select! {
                accepted = listener.accept() => match accepted {
                    Ok((stream, _)) => {
                        match ipc::listener::handle_connection(stream, &service).await {
                            Ok(true) => break,
                            Ok(false) => {}
                            Err(e) => warn!(error = %e, "IPC connection failed"),
                        }
                    }
                    Err(e) => warn!(error = %e, "IPC accept failed"),
                },
                _ = sigint.recv() => {
                    warn!("SIGINT received");
                    break;
                }
                _ = sigterm.recv() => {
                    warn!("SIGTERM received");
                    break;
                }
            }
        }
    }

    info!("Daemon shutting down...");

    let _ = http_stop_tx.send(());
    if let Some(handle) = http_handle {
        let _ = handle.await;
    }
    pool.shutdown().await;
    ipc::listener::cleanup_socket(&socket_path);
    manager.unregister()?;

    info!("Daemon stopped");
    Ok(())
}
