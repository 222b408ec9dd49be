//! Job execution: the job body and the runners that host it

use std::fs::{self, File};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sessionstore::{SessionStore, Turn, session_context};
use tokio::process::Command;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use super::{Job, JobError};
use crate::config::Config;
use crate::daemon::is_process_running;
use crate::llm::LlmProvider;
use crate::pipeline::{Sequencer, Stage, StageContext, StageError, TurnInput};

/// Exit status of `run-job` when the turn failed and its marker is recorded
pub const STAGE_FAILURE_EXIT: i32 = 2;

/// Lines of captured stderr kept in a crash message
const STDERR_TAIL_LINES: usize = 5;

/// How often an adopted job process is checked for exit
const ADOPTED_POLL: Duration = Duration::from_millis(500);

/// How a job ended, as seen by the worker
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// The turn was appended
    Completed,
    /// The turn failed and the job body recorded the error marker
    Failed { message: String },
    /// The job ended abnormally; no marker has been written yet
    Crashed { message: String },
    /// The runner stopped watching a job that is still running
    Detached,
}

/// Hosts one job to completion
#[async_trait]
pub trait JobRunner: Send + Sync {
    /// Run `job`, whose durable record lives at `job_file`
    async fn run(&self, job: &Job, job_file: &Path) -> JobOutcome;

    /// Stop waiting on running jobs; a runner that cannot leave a job behind
    /// ignores this and lets it finish
    fn stop(&self) {}
}

/// The body of every job
///
/// Loads the session, runs the sequencer and appends the turn. A stage error is
/// recorded as the session's error marker before it is returned.
pub async fn execute_job(
    job: &Job,
    config: &Config,
    llm: &dyn LlmProvider,
    store: &SessionStore,
) -> Result<Turn, JobError> {
    let model = job.request.model_or(&config.pipeline).to_string();
    debug!(job_id = %job.id, session = %job.session_name, turn = job.turn_number, %model, "execute_job: called");

    let session = store.load(&job.session_name)?;
    if let Some(done) = session.turn(job.turn_number) {
        info!(job_id = %job.id, turn = job.turn_number, "Turn already recorded, nothing to do");
        return Ok(done.clone());
    }

    let context = (!session.turns.is_empty()).then(|| session_context(&session));
    let input = TurnInput {
        turn_number: job.turn_number,
        prompt: job.request.prompt.clone(),
        context,
    };
    let plan = job.request.plan(&config.pipeline);

    let result = match llm.client_for(&model) {
        Ok(client) => {
            let exec_id = format!("{}/{}", job.session_name, job.turn_number);
            let sequencer = Sequencer::new(StageContext::new(config, client, model, exec_id));
            sequencer.run(&plan, &input).await
        }
        Err(e) => Err(StageError::llm(Stage::Expand, e)),
    };

    match result {
        Ok(turn) => {
            store.append_turn(&job.session_name, turn.clone())?;
            Ok(turn)
        }
        Err(e) => {
            error!(job_id = %job.id, session = %job.session_name, error = %e, "Turn failed");
            store.record_error(&job.session_name, job.turn_number, &e.to_string())?;
            Err(JobError::Stage(e))
        }
    }
}

/// Runs each job as a separate `chorus run-job` process
///
/// Every running job leaves `<job-id>.pid` and `<job-id>.stderr` in the state
/// directory. A job process outlives the daemon that started it; a later
/// daemon that is handed the same job adopts the process instead of starting
/// a second one.
#[derive(Debug)]
pub struct ProcessRunner {
    exe: PathBuf,
    config_path: Option<PathBuf>,
    state_dir: PathBuf,
    stopping: watch::Sender<bool>,
}

impl ProcessRunner {
    pub fn new(exe: PathBuf, config_path: Option<PathBuf>, state_dir: PathBuf) -> Self {
        let (stopping, _) = watch::channel(false);
        Self {
            exe,
            config_path,
            state_dir,
            stopping,
        }
    }

    /// Runner that re-invokes the current executable
    pub fn current_exe(config_path: Option<PathBuf>, state_dir: PathBuf) -> std::io::Result<Self> {
        Ok(Self::new(std::env::current_exe()?, config_path, state_dir))
    }

    fn pid_file(&self, job: &Job) -> PathBuf {
        self.state_dir.join(format!("{}.pid", job.id))
    }

    fn stderr_file(&self, job: &Job) -> PathBuf {
        self.state_dir.join(format!("{}.stderr", job.id))
    }

    /// Pid of a still-running process started for `job` by an earlier daemon
    fn live_pid(&self, job: &Job) -> Option<u32> {
        let pid: u32 = fs::read_to_string(self.pid_file(job)).ok()?.trim().parse().ok()?;
        is_process_running(pid).then_some(pid)
    }

    fn stderr_tail(&self, job: &Job, fallback: &str) -> String {
        let stderr = fs::read_to_string(self.stderr_file(job)).unwrap_or_default();
        crash_message(&stderr, fallback)
    }

    fn cleanup(&self, job: &Job) {
        for path in [self.pid_file(job), self.stderr_file(job)] {
            if let Err(e) = fs::remove_file(&path)
                && e.kind() != ErrorKind::NotFound
            {
                warn!(path = ?path, error = %e, "Failed to remove job state file");
            }
        }
    }

    /// Wait for a process this runner did not spawn
    ///
    /// Its exit status is not observable, so it is reported as a crash carrying
    /// its stderr; a turn or marker it wrote takes precedence in the worker.
    async fn wait_adopted(&self, job: &Job, pid: u32) -> JobOutcome {
        info!(job_id = %job.id, pid, "Adopting job process from a previous daemon");
        let mut stopping = self.stopping.subscribe();
        let mut tick = tokio::time::interval(ADOPTED_POLL);
        while is_process_running(pid) {
            tokio::select! {
                _ = tick.tick() => {}
                _ = stopping.wait_for(|stop| *stop) => return JobOutcome::Detached,
            }
        }

        let message = self.stderr_tail(job, "job process ended while the daemon was away");
        self.cleanup(job);
        JobOutcome::Crashed { message }
    }

    async fn spawn_and_wait(&self, job: &Job, job_file: &Path) -> JobOutcome {
        if let Err(e) = fs::create_dir_all(&self.state_dir) {
            return JobOutcome::Crashed {
                message: format!("failed to prepare job state directory: {}", e),
            };
        }
        let stderr = match File::create(self.stderr_file(job)) {
            Ok(file) => file,
            Err(e) => {
                return JobOutcome::Crashed {
                    message: format!("failed to create job stderr file: {}", e),
                };
            }
        };

        let mut cmd = Command::new(&self.exe);
        cmd.arg("run-job").arg(job_file);
        if let Some(config) = &self.config_path {
            cmd.arg("--config").arg(config);
        }
        cmd.stdin(Stdio::null()).stdout(Stdio::null()).stderr(Stdio::from(stderr));
        // Own process group: a terminal SIGINT to the daemon must not reach jobs
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.cleanup(job);
                return JobOutcome::Crashed {
                    message: format!("failed to start job process: {}", e),
                };
            }
        };
        let pid = child.id();
        if let Some(pid) = pid
            && let Err(e) = fs::write(self.pid_file(job), pid.to_string())
        {
            warn!(job_id = %job.id, error = %e, "Failed to write job pid file");
        }

        let mut stopping = self.stopping.subscribe();
        let status = tokio::select! {
            status = child.wait() => status,
            _ = stopping.wait_for(|stop| *stop) => {
                info!(job_id = %job.id, ?pid, "Leaving job process running");
                return JobOutcome::Detached;
            }
        };

        let outcome = match status {
            Ok(status) => match status.code() {
                Some(0) => JobOutcome::Completed,
                Some(STAGE_FAILURE_EXIT) => JobOutcome::Failed {
                    message: self.stderr_tail(job, &status.to_string()),
                },
                _ => {
                    warn!(job_id = %job.id, %status, "Job process exited abnormally");
                    JobOutcome::Crashed {
                        message: self.stderr_tail(job, &format!("job process {}", status)),
                    }
                }
            },
            Err(e) => JobOutcome::Crashed {
                message: format!("lost track of job process: {}", e),
            },
        };
        self.cleanup(job);
        outcome
    }
}

#[async_trait]
impl JobRunner for ProcessRunner {
    async fn run(&self, job: &Job, job_file: &Path) -> JobOutcome {
        debug!(job_id = %job.id, exe = ?self.exe, ?job_file, "ProcessRunner::run: called");
        match self.live_pid(job) {
            Some(pid) => self.wait_adopted(job, pid).await,
            None => self.spawn_and_wait(job, job_file).await,
        }
    }

    fn stop(&self) {
        debug!("ProcessRunner::stop: called");
        self.stopping.send_replace(true);
    }
}

/// Last non-empty stderr lines, or `fallback` when there are none
pub fn crash_message(stderr: &str, fallback: &str) -> String {
    let lines: Vec<&str> = stderr.lines().map(str::trim).filter(|l| !l.is_empty()).collect();
    if lines.is_empty() {
        return fallback.to_string();
    }
    let start = lines.len().saturating_sub(STDERR_TAIL_LINES);
    lines[start..].join("\n")
}

/// Runs each job as a tokio task inside the daemon
pub struct InProcessRunner {
    config: Arc<Config>,
    llm: Arc<dyn LlmProvider>,
    store: Arc<SessionStore>,
}

impl InProcessRunner {
    pub fn new(config: Arc<Config>, llm: Arc<dyn LlmProvider>, store: Arc<SessionStore>) -> Self {
        Self { config, llm, store }
    }
}

#[async_trait]
impl JobRunner for InProcessRunner {
    async fn run(&self, job: &Job, _job_file: &Path) -> JobOutcome {
        debug!(job_id = %job.id, "InProcessRunner::run: called");
        let job = job.clone();
        let config = self.config.clone();
        let llm = self.llm.clone();
        let store = self.store.clone();

        let handle = tokio::spawn(async move { execute_job(&job, &config, llm.as_ref(), &store).await });
        match handle.await {
            Ok(Ok(_)) => JobOutcome::Completed,
            Ok(Err(JobError::Stage(e))) => JobOutcome::Failed { message: e.to_string() },
            Ok(Err(e)) => JobOutcome::Crashed { message: e.to_string() },
            Err(join) if join.is_panic() => {
                let payload = join.into_panic();
                let detail = payload
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| payload.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".to_string());
                JobOutcome::Crashed {
                    message: format!("job panicked: {}", detail),
                }
            }
            Err(join) => JobOutcome::Crashed {
                message: format!("job task cancelled: {}", join),
            },
        }
    }
}
