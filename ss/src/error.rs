//! SessionStore error types

use thiserror::Error;

/// Errors from session store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Session not found: {0}")]
    NotFound(String),

    #[error("Session already exists: {0}")]
    AlreadyExists(String),

    #[error("Corrupt session file {name}: {reason}")]
    Corrupt { name: String, reason: String },

    #[error("Invalid session name '{0}' (expected 1-64 chars of [a-z0-9-])")]
    InvalidName(String),

    #[error("Turn {got} out of order for session {name}, expected {expected}")]
    TurnOutOfOrder { name: String, expected: u32, got: u32 },

    #[error("Lock for session {name} is held by {holder}")]
    LockHeld { name: String, holder: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl StoreError {
    /// Check if this error means the session does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_turn_out_of_order_message() {
        let err = StoreError::TurnOutOfOrder {
            name: "amber-falcon".to_string(),
            expected: 3,
            got: 5,
        };

        let msg = err.to_string();
        assert!(msg.contains("amber-falcon"));
        assert!(msg.contains("expected 3"));
    }

    #[test]
    fn test_is_not_found() {
        assert!(StoreError::NotFound("x".to_string()).is_not_found());
        assert!(!StoreError::AlreadyExists("x".to_string()).is_not_found());
    }
}
