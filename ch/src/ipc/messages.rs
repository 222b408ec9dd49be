//! IPC message types

use serde::{Deserialize, Serialize};

use crate::jobs::{JobRequest, StatusView, SubmissionAck};

/// Messages from the CLI to the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DaemonMessage {
    /// Submit a turn for background execution
    Submit { request: JobRequest },

    /// Query one turn's status
    Status { session_name: String, turn_number: u32 },

    /// Ping to check if daemon is alive
    Ping,

    /// Request daemon to stop gracefully
    Shutdown,
}

/// Responses from the daemon
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum DaemonResponse {
    Accepted { ack: SubmissionAck },

    Status { view: StatusView },

    /// Acknowledgment
    Ok,

    Pong { version: String },

    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ping_serialize() {
        let json = serde_json::to_string(&DaemonMessage::Ping).unwrap();
        assert_eq!(json, r#"{"type":"Ping"}"#);
    }

    #[test]
    fn test_status_serialize() {
        let msg = DaemonMessage::Status {
            session_name: "amber-falcon".to_string(),
            turn_number: 2,
        };
        let json = serde_json::to_string(&msg).unwrap();
        assert_eq!(json, r#"{"type":"Status","session_name":"amber-falcon","turn_number":2}"#);
    }

    #[test]
    fn test_submit_deserialize() {
        let json = r#"{"type":"Submit","request":{"prompt":"Why?","perspectives":3}}"#;
        match serde_json::from_str::<DaemonMessage>(json).unwrap() {
            DaemonMessage::Submit { request } => {
                assert_eq!(request.prompt, "Why?");
                assert_eq!(request.perspectives, 3);
            }
            other => panic!("unexpected message {:?}", other),
        }
    }

    #[test]
    fn test_status_response_nests_view() {
        let resp = DaemonResponse::Status {
            view: StatusView::Running { completed_turns: 1 },
        };
        let json = serde_json::to_value(&resp).unwrap();
        assert_eq!(json["type"], "Status");
        assert_eq!(json["view"]["status"], "running");
    }

    #[test]
    fn test_error_response_serialize() {
        let resp = DaemonResponse::Error {
            message: "Something went wrong".to_string(),
        };
        let json = serde_json::to_string(&resp).unwrap();
        assert_eq!(json, r#"{"type":"Error","message":"Something went wrong"}"#);
    }
}
