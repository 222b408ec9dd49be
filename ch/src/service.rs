//! Wiring of the job layer shared by the daemon, IPC and HTTP fronts

use std::sync::Arc;
use std::time::Duration;

use eyre::{Context, Result};
use sessionstore::{SessionStore, Turn};
use tokio::sync::Notify;
use tracing::{debug, info};

use crate::config::Config;
use crate::jobs::{
    Gateway, GatewayError, InFlightRegistry, JobError, JobQueue, JobRequest, JobRunner, StatusView, SubmissionAck,
    WorkerDeps, WorkerPool, build_registry, execute_job, poll,
};
use crate::llm::LlmProvider;

pub struct ChorusService {
    config: Arc<Config>,
    store: Arc<SessionStore>,
    queue: Arc<JobQueue>,
    registry: Arc<dyn InFlightRegistry>,
    notify: Arc<Notify>,
    gateway: Gateway,
}

impl ChorusService {
    /// Open storage under the configured data dir with the configured registry
    pub fn open(config: Arc<Config>) -> Result<Self> {
        let registry = build_registry(&config.jobs, &config.storage.sessions_dir());
        Self::with_registry(config, registry)
    }

    pub fn with_registry(config: Arc<Config>, registry: Arc<dyn InFlightRegistry>) -> Result<Self> {
        debug!(data_dir = ?config.storage.data_dir, "ChorusService::with_registry: called");
        let store = Arc::new(SessionStore::open(config.storage.sessions_dir()).context("Failed to open session store")?);
        let queue = Arc::new(JobQueue::open(config.storage.queue_dir()).context("Failed to open job queue")?);
        let notify = Arc::new(Notify::new());
        let gateway = Gateway::new(
            config.clone(),
            store.clone(),
            registry.clone(),
            queue.clone(),
            notify.clone(),
        );
        Ok(Self {
            config,
            store,
            queue,
            registry,
            notify,
            gateway,
        })
    }

    pub fn config(&self) -> &Arc<Config> {
        &self.config
    }

    pub fn store(&self) -> &Arc<SessionStore> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<JobQueue> {
        &self.queue
    }

    pub fn submit(&self, request: JobRequest) -> Result<SubmissionAck, GatewayError> {
        self.gateway.submit(request)
    }

    pub fn status(&self, session_name: &str, turn_number: u32) -> StatusView {
        poll(&self.store, session_name, turn_number)
    }

    /// Run a request to completion in the caller's task, bypassing the queue
    ///
    /// The session is claimed exactly as for a queued job.
    pub async fn run_now(&self, request: JobRequest, llm: &dyn LlmProvider) -> Result<Turn> {
        let job = self.gateway.admit(request)?;
        info!(session = %job.session_name, turn = job.turn_number, "Running turn in the foreground");
        let result = execute_job(&job, &self.config, llm, &self.store).await;
        self.gateway.release(&job);
        match result {
            Ok(turn) => Ok(turn),
            Err(JobError::Stage(e)) => Err(eyre::eyre!("Turn {} of {} failed: {}", job.turn_number, job.session_name, e)),
            Err(e) => Err(e.into()),
        }
    }

    /// Requeue orphaned jobs, then start the configured number of workers
    pub fn start_workers(&self, runner: Arc<dyn JobRunner>) -> Result<WorkerPool> {
        let recovered = self.queue.recover_orphans().context("Failed to recover orphaned jobs")?;
        if recovered > 0 {
            self.notify.notify_one();
        }

        let jobs = &self.config.jobs;
        let deps = WorkerDeps {
            queue: self.queue.clone(),
            registry: self.registry.clone(),
            store: self.store.clone(),
            runner,
            heartbeat: Duration::from_secs(jobs.heartbeat_secs.max(1)),
            poll_interval: Duration::from_secs(jobs.poll_interval_secs.max(1)),
        };
        Ok(WorkerPool::start(jobs.workers, deps, self.notify.clone()))
    }
}
