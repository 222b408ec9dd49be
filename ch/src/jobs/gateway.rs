//! Submission gateway: validate, claim the session, enqueue, acknowledge
//!
//! Submission never waits on the pipeline. The reply is returned as soon as the
//! durable job record is written.

use std::sync::Arc;

use sessionstore::{SessionStore, is_valid_name};
use tokio::sync::Notify;
use tracing::{debug, info, warn};

use super::{GatewayError, InFlightRegistry, Job, JobQueue, JobRequest, SubmissionAck};
use crate::config::Config;
use crate::llm::Pricing;

pub struct Gateway {
    config: Arc<Config>,
    store: Arc<SessionStore>,
    registry: Arc<dyn InFlightRegistry>,
    queue: Arc<JobQueue>,
    pricing: Pricing,
    notify: Arc<Notify>,
}

impl Gateway {
    pub fn new(
        config: Arc<Config>,
        store: Arc<SessionStore>,
        registry: Arc<dyn InFlightRegistry>,
        queue: Arc<JobQueue>,
        notify: Arc<Notify>,
    ) -> Self {
        let pricing = Pricing::new(config.pricing.clone());
        Self {
            config,
            store,
            registry,
            queue,
            pricing,
            notify,
        }
    }

    /// Accept a request for background execution
    pub fn submit(&self, request: JobRequest) -> Result<SubmissionAck, GatewayError> {
        let job = self.admit(request)?;

        if let Err(e) = self.queue.enqueue(&job) {
            warn!(session = %job.session_name, error = %e, "Enqueue failed, releasing session");
            self.release(&job);
            return Err(e.into());
        }
        self.notify.notify_one();

        let ack = SubmissionAck::accepted(
            &job.session_name,
            job.turn_number,
            &self.config.server.public_base_url,
            job.request.perspectives,
            self.config.pipeline.seconds_per_perspective,
        );
        info!(session = %job.session_name, turn = job.turn_number, job_id = %job.id, "Accepted submission");
        Ok(ack)
    }

    /// Validate, resolve the session and claim it for a new job
    ///
    /// On success the caller owns the session lock under `job.id` and must
    /// release it once the job has ended.
    pub fn admit(&self, mut request: JobRequest) -> Result<Job, GatewayError> {
        debug!(perspectives = request.perspectives, session = ?request.session_name, "Gateway::admit: called");
        self.validate(&request)?;
        request.model = Some(request.model_or(&self.config.pipeline).to_string());

        let name = match &request.session_name {
            Some(name) if self.store.exists(name) => name.clone(),
            Some(name) => {
                let fresh = self.store.create()?.session_name;
                info!(requested = %name, session = %fresh, "Unknown session, starting a new one");
                fresh
            }
            None => self.store.create()?.session_name,
        };
        request.session_name = Some(name.clone());

        // The job id doubles as the lock holder; turn state is read under the lock
        let mut job = Job::new(&name, 0, request);
        if !self.registry.try_acquire(&name, &job.id)? {
            info!(session = %name, "Rejected duplicate submission");
            return Err(GatewayError::DuplicateInFlight { session: name });
        }

        if let Err(e) = self.prepare(&mut job) {
            self.release(&job);
            return Err(e);
        }
        Ok(job)
    }

    /// Drop the session lock a job holds
    pub fn release(&self, job: &Job) {
        if let Err(e) = self.registry.release(&job.session_name, &job.id) {
            warn!(session = %job.session_name, error = %e, "Failed to release session lock");
        }
    }

    fn validate(&self, request: &JobRequest) -> Result<(), GatewayError> {
        if request.prompt.trim().is_empty() {
            return Err(GatewayError::Validation("prompt must not be empty".to_string()));
        }

        let max = self.config.pipeline.max_perspectives;
        if request.perspectives > max {
            return Err(GatewayError::Validation(format!(
                "perspectives must be at most {}, got {}",
                max, request.perspectives
            )));
        }

        let model = request.model_or(&self.config.pipeline);
        self.pricing
            .ensure_known(model)
            .map_err(|e| GatewayError::Validation(e.to_string()))?;

        if let Some(name) = &request.session_name
            && !is_valid_name(name)
        {
            return Err(GatewayError::Validation(format!("invalid session name '{}'", name)));
        }
        Ok(())
    }

    /// Fix the turn number under the lock and clear a stale error marker
    fn prepare(&self, job: &mut Job) -> Result<(), GatewayError> {
        let session = self.store.load(&job.session_name)?;
        job.turn_number = session.next_turn_number();
        if session.error.is_some() {
            self.store.clear_error(&job.session_name)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::jobs::{Claim, MemoryRegistry};
    use tempfile::TempDir;

    struct Fixture {
        _temp: TempDir,
        gateway: Gateway,
        store: Arc<SessionStore>,
        queue: Arc<JobQueue>,
        registry: Arc<dyn InFlightRegistry>,
    }

    fn fixture() -> Fixture {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(SessionStore::open(temp.path().join("sessions")).unwrap());
        let queue = Arc::new(JobQueue::open(temp.path().join("queue")).unwrap());
        let registry: Arc<dyn InFlightRegistry> = Arc::new(MemoryRegistry::new());
        let gateway = Gateway::new(
            Arc::new(Config::default()),
            store.clone(),
            registry.clone(),
            queue.clone(),
            Arc::new(Notify::new()),
        );
        Fixture {
            _temp: temp,
            gateway,
            store,
            queue,
            registry,
        }
    }

    #[test]
    fn test_new_session_gets_turn_one() {
        let f = fixture();
        let ack = f.gateway.submit(JobRequest::new("Why?", 3)).unwrap();
        assert_eq!(ack.turn_number, 1);
        assert!(f.store.exists(&ack.session_name));
        assert!(f.registry.is_held(&ack.session_name).unwrap());
        assert_eq!(f.queue.pending_count().unwrap(), 1);
        assert_eq!(ack.estimated_seconds, 3 * 45);
    }

    #[test]
    fn test_duplicate_in_flight_is_rejected() {
        let f = fixture();
        let ack = f.gateway.submit(JobRequest::new("First", 0)).unwrap();

        let again = JobRequest {
            session_name: Some(ack.session_name.clone()),
            ..JobRequest::new("Second", 0)
        };
        let err = f.gateway.submit(again).unwrap_err();
        assert!(matches!(err, GatewayError::DuplicateInFlight { session } if session == ack.session_name));
        assert_eq!(f.queue.pending_count().unwrap(), 1);
    }

    #[test]
    fn test_validation_errors() {
        let f = fixture();
        assert!(matches!(
            f.gateway.submit(JobRequest::new("   ", 2)),
            Err(GatewayError::Validation(_))
        ));
        assert!(matches!(
            f.gateway.submit(JobRequest::new("Q", 99)),
            Err(GatewayError::Validation(_))
        ));

        let unknown_model = JobRequest {
            model: Some("mystery-model".to_string()),
            ..JobRequest::new("Q", 2)
        };
        assert!(matches!(f.gateway.submit(unknown_model), Err(GatewayError::Validation(m)) if m.contains("mystery-model")));

        let bad_name = JobRequest {
            session_name: Some("../etc/passwd".to_string()),
            ..JobRequest::new("Q", 2)
        };
        assert!(matches!(f.gateway.submit(bad_name), Err(GatewayError::Validation(m)) if m.contains("invalid session name")));
        assert_eq!(f.queue.pending_count().unwrap(), 0);
    }

    #[test]
    fn test_unknown_session_starts_fresh_one() {
        let f = fixture();
        let request = JobRequest {
            session_name: Some("no-such-session".to_string()),
            ..JobRequest::new("Q", 2)
        };
        let ack = f.gateway.submit(request).unwrap();

        assert_ne!(ack.session_name, "no-such-session");
        assert_eq!(ack.turn_number, 1);
        assert!(f.store.exists(&ack.session_name));
        assert!(!f.store.exists("no-such-session"));
        assert_eq!(f.queue.claim().unwrap().and_then(Claim::into_job).unwrap().job.session_name, ack.session_name);
    }

    #[test]
    fn test_resubmission_clears_error_marker() {
        let f = fixture();
        let session = f.store.create().unwrap();
        f.store.record_error(&session.session_name, 1, "boom").unwrap();

        let request = JobRequest {
            session_name: Some(session.session_name.clone()),
            ..JobRequest::new("Retry", 0)
        };
        let ack = f.gateway.submit(request).unwrap();
        assert_eq!(ack.turn_number, 1);
        assert!(f.store.load(&session.session_name).unwrap().error.is_none());
    }

    #[test]
    fn test_job_carries_resolved_model() {
        let f = fixture();
        f.gateway.submit(JobRequest::new("Q", 2)).unwrap();
        let claimed = f.queue.claim().unwrap().and_then(Claim::into_job).unwrap();
        assert_eq!(claimed.job.request.model.as_deref(), Some("claude-sonnet-4-20250514"));
    }
}
