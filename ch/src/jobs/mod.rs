//! Job layer: submission, in-flight tracking, durable queue, workers, status

mod error;
mod gateway;
mod poller;
mod queue;
mod registry;
mod request;
mod runner;
mod worker;

pub use error::{GatewayError, JobError, QueueError};
pub use gateway::Gateway;
pub use poller::{StatusView, poll};
pub use queue::{Claim, ClaimedJob, JobQueue, UnreadableJob};
pub use registry::{InFlightRegistry, LockFileRegistry, MemoryRegistry, build_registry};
pub use request::{Job, JobRequest, POLL_ADVICE_SECS, SubmissionAck};
pub use runner::{InProcessRunner, JobOutcome, JobRunner, ProcessRunner, STAGE_FAILURE_EXIT, crash_message, execute_job};
pub use worker::{WorkerDeps, WorkerPool};
