//! Status poller: a pure read of the session file

use serde::{Deserialize, Serialize};
use sessionstore::{Session, SessionStore, Turn};
use tracing::{debug, warn};

/// What a caller sees for one (session, turn)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum StatusView {
    Running {
        #[serde(rename = "completedTurns")]
        completed_turns: u32,
    },
    Complete {
        result: Turn,
    },
    Error {
        message: String,
    },
}

/// Status of `turn_number` in `session_name`
///
/// Takes no locks and never writes. A session that does not exist yet reads as
/// running with no completed turns.
pub fn poll(store: &SessionStore, session_name: &str, turn_number: u32) -> StatusView {
    debug!(%session_name, turn_number, "poll: called");
    let raw = match store.read_raw(session_name) {
        Ok(Some(raw)) => raw,
        Ok(None) => return StatusView::Running { completed_turns: 0 },
        Err(e) => {
            warn!(%session_name, error = %e, "poll: read failed");
            return StatusView::Error { message: e.to_string() };
        }
    };

    let session: Session = match serde_json::from_str(&raw) {
        Ok(session) => session,
        Err(e) => {
            warn!(%session_name, error = %e, "poll: corrupt session file");
            return StatusView::Error {
                message: "corrupt session file".to_string(),
            };
        }
    };

    if let Some(marker) = session.error_for(turn_number) {
        return StatusView::Error {
            message: marker.message.clone(),
        };
    }

    match session.turn(turn_number) {
        Some(turn) => StatusView::Complete { result: turn.clone() },
        None => StatusView::Running {
            completed_turns: session.completed_turns(),
        },
    }
}
