//! Worker pool draining the job queue

use std::sync::Arc;
use std::time::Duration;

use sessionstore::SessionStore;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::queue::{Claim, ClaimedJob, UnreadableJob};
use super::{InFlightRegistry, JobOutcome, JobQueue, JobRunner};

/// Shared handles every worker needs
pub struct WorkerDeps {
    pub queue: Arc<JobQueue>,
    pub registry: Arc<dyn InFlightRegistry>,
    pub store: Arc<SessionStore>,
    pub runner: Arc<dyn JobRunner>,
    pub heartbeat: Duration,
    pub poll_interval: Duration,
}

pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
    deps: Arc<WorkerDeps>,
}

impl WorkerPool {
    /// Spawn `workers` tasks; each wakes on `notify` or every poll interval
    pub fn start(workers: usize, deps: WorkerDeps, notify: Arc<Notify>) -> Self {
        let workers = workers.max(1);
        info!(workers, "Starting worker pool");
        let deps = Arc::new(deps);
        let (shutdown, rx) = watch::channel(false);

        let handles = (0..workers)
            .map(|id| tokio::spawn(worker_loop(id, deps.clone(), notify.clone(), rx.clone())))
            .collect();

        Self { handles, shutdown, deps }
    }

    /// Stop taking new jobs and wait for the workers to return
    ///
    /// Jobs the runner can leave behind stay claimed and locked for the next
    /// daemon; the rest run to completion first.
    pub async fn shutdown(self) {
        info!("Stopping worker pool");
        let _ = self.shutdown.send(true);
        self.deps.runner.stop();
        for handle in self.handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task ended abnormally");
            }
        }
    }
}

async fn worker_loop(id: usize, deps: Arc<WorkerDeps>, notify: Arc<Notify>, mut shutdown: watch::Receiver<bool>) {
    debug!(worker = id, "worker_loop: started");
    loop {
        // Drain everything that is ready before sleeping again
        loop {
            if *shutdown.borrow() {
                debug!(worker = id, "worker_loop: shutdown");
                return;
            }
            match deps.queue.claim() {
                Ok(Some(Claim::Job(claimed))) => process(id, &deps, claimed).await,
                Ok(Some(Claim::Unreadable(bad))) => report_unreadable(&deps, &bad),
                Ok(None) => break,
                Err(e) => {
                    error!(worker = id, error = %e, "Failed to claim job");
                    break;
                }
            }
        }

        tokio::select! {
            _ = notify.notified() => debug!(worker = id, "worker_loop: woken"),
            _ = tokio::time::sleep(deps.poll_interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!(worker = id, "worker_loop: shutdown");
                    return;
                }
            }
        }
    }
}

/// Run one claimed job through termination handling
async fn process(worker: usize, deps: &WorkerDeps, claimed: ClaimedJob) {
    let job = &claimed.job;
    info!(worker, job_id = %job.id, session = %job.session_name, turn = job.turn_number, "Running job");

    // Redelivered jobs re-take their own lock; another holder owns the session now
    match deps.registry.try_acquire(&job.session_name, &job.id) {
        Ok(true) => {}
        Ok(false) => {
            warn!(job_id = %job.id, session = %job.session_name, "Session held by another job, dropping redelivered job");
            finish(deps, &claimed);
            return;
        }
        Err(e) => error!(job_id = %job.id, error = %e, "Failed to take session lock"),
    }

    let already_done = deps
        .store
        .load(&job.session_name)
        .map(|s| s.turn(job.turn_number).is_some())
        .unwrap_or(false);

    if already_done {
        info!(job_id = %job.id, "Turn already recorded, skipping redelivered job");
    } else {
        let heartbeat = spawn_heartbeat(deps, &job.session_name, &job.id);
        let outcome = deps.runner.run(job, &claimed.path).await;
        heartbeat.abort();
        if outcome == JobOutcome::Detached {
            info!(job_id = %job.id, "Job left running for the next daemon");
            return;
        }
        handle_outcome(deps, &claimed, outcome);
    }

    if let Err(e) = deps.registry.release(&job.session_name, &job.id) {
        error!(job_id = %job.id, error = %e, "Failed to release session lock");
    }
    finish(deps, &claimed);
}

fn finish(deps: &WorkerDeps, claimed: &ClaimedJob) {
    if let Err(e) = deps.queue.finish(claimed) {
        error!(job_id = %claimed.job.id, error = %e, "Failed to remove finished job");
    }
}

/// A job file that could not be read still ends its turn and frees its session
fn report_unreadable(deps: &WorkerDeps, bad: &UnreadableJob) {
    debug!(job_id = %bad.job_id, session = %bad.session_name, "report_unreadable: called");
    let settled = deps
        .store
        .load(&bad.session_name)
        .map(|s| s.turn(bad.turn_number).is_some() || s.error_for(bad.turn_number).is_some())
        .unwrap_or(false);

    if !settled {
        let message = format!("job record unreadable: {}", bad.reason);
        if let Err(e) = deps.store.record_error(&bad.session_name, bad.turn_number, &message) {
            error!(job_id = %bad.job_id, error = %e, "Failed to record job error");
        }
    }
    if let Err(e) = deps.registry.release(&bad.session_name, &bad.job_id) {
        error!(job_id = %bad.job_id, error = %e, "Failed to release session lock");
    }
}

fn spawn_heartbeat(deps: &WorkerDeps, session: &str, holder: &str) -> JoinHandle<()> {
    let registry = deps.registry.clone();
    let every = deps.heartbeat;
    let session = session.to_string();
    let holder = holder.to_string();
    tokio::spawn(async move {
        let mut tick = tokio::time::interval(every);
        // First tick fires immediately; the lock was refreshed on acquire
        tick.tick().await;
        loop {
            tick.tick().await;
            match registry.heartbeat(&session, &holder) {
                Ok(true) => debug!(%session, "heartbeat: refreshed"),
                Ok(false) => warn!(%session, %holder, "Lost session lock while running"),
                Err(e) => warn!(%session, error = %e, "Heartbeat failed"),
            }
        }
    })
}

/// Make sure every finished job leaves either a turn or an error marker
///
/// A recorded turn wins over whatever the runner reported, and a marker the
/// job body already wrote is never overwritten.
fn handle_outcome(deps: &WorkerDeps, claimed: &ClaimedJob, outcome: JobOutcome) {
    let job = &claimed.job;
    debug!(job_id = %job.id, ?outcome, "handle_outcome: called");

    let session = deps.store.load(&job.session_name).ok();
    let recorded = session.as_ref().is_some_and(|s| s.turn(job.turn_number).is_some());
    let marked = session.as_ref().is_some_and(|s| s.error_for(job.turn_number).is_some());

    if recorded {
        match outcome {
            JobOutcome::Completed => info!(job_id = %job.id, turn = job.turn_number, "Job complete"),
            other => warn!(job_id = %job.id, outcome = ?other, "Job ended abnormally after recording its turn"),
        }
        return;
    }
    if marked {
        return;
    }

    let message = match outcome {
        JobOutcome::Completed => format!("job finished without recording turn {}", job.turn_number),
        JobOutcome::Failed { message } | JobOutcome::Crashed { message } => message,
        JobOutcome::Detached => return,
    };

    warn!(job_id = %job.id, session = %job.session_name, %message, "Job ended abnormally");
    if let Err(e) = deps.store.record_error(&job.session_name, job.turn_number, &message) {
        error!(job_id = %job.id, error = %e, "Failed to record job error");
    }
}
