//! Job layer error types

use sessionstore::StoreError;
use thiserror::Error;

use crate::pipeline::StageError;

/// Synchronous submission failures
#[derive(Debug, Error)]
pub enum GatewayError {
    #[error("Invalid request: {0}")]
    Validation(String),

    #[error("A turn is already in flight for session {session}")]
    DuplicateInFlight { session: String },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Queue IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Queue JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Why a job body did not produce a turn
#[derive(Debug, Error)]
pub enum JobError {
    /// The turn failed; its error marker is already persisted
    #[error(transparent)]
    Stage(#[from] StageError),

    #[error(transparent)]
    Store(#[from] StoreError),
}
