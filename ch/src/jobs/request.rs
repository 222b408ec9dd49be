//! Submission, job and acknowledgement records

use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::pipeline::{DispatchPolicy, RunMode, RunPlan};

/// Suggested client poll interval quoted in every acknowledgement
pub const POLL_ADVICE_SECS: u64 = 10;

/// A caller's request for one turn
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRequest {
    pub prompt: String,
    /// 0 runs a single call
    #[serde(default)]
    pub perspectives: u32,
    #[serde(default)]
    pub summarize: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default)]
    pub dry_run: bool,
    /// Falls back to the configured default when absent
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub serial_fan_out: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_name: Option<String>,
    #[serde(default)]
    pub tools: bool,
}

impl JobRequest {
    pub fn new(prompt: impl Into<String>, perspectives: u32) -> Self {
        Self {
            prompt: prompt.into(),
            perspectives,
            summarize: false,
            model: None,
            dry_run: false,
            serial_fan_out: None,
            session_name: None,
            tools: false,
        }
    }

    /// Model id, or the configured default
    pub fn model_or<'a>(&'a self, config: &'a PipelineConfig) -> &'a str {
        self.model.as_deref().unwrap_or(&config.default_model)
    }

    /// Build the run plan this request asks for
    pub fn plan(&self, config: &PipelineConfig) -> RunPlan {
        let serial = self.serial_fan_out.unwrap_or(config.serial_fan_out);
        let plan = RunPlan {
            mode: RunMode::from_perspectives(self.perspectives),
            dry_run: self.dry_run,
            summarize: self.summarize,
            dispatch: if serial {
                DispatchPolicy::Serial
            } else {
                DispatchPolicy::Concurrent
            },
            tools_enabled: self.tools,
        };
        debug!(?plan, "JobRequest::plan: built");
        plan
    }
}

/// A durable unit of queued work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// uuid v7, so lexical order is enqueue order
    pub id: String,
    pub session_name: String,
    pub turn_number: u32,
    pub request: JobRequest,
    pub enqueued_at: i64,
}

impl Job {
    pub fn new(session_name: impl Into<String>, turn_number: u32, request: JobRequest) -> Self {
        Self {
            id: Uuid::now_v7().to_string(),
            session_name: session_name.into(),
            turn_number,
            request,
            enqueued_at: sessionstore::now_ms(),
        }
    }
}

/// Immediate reply to an accepted submission
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmissionAck {
    pub status: String,
    pub session_name: String,
    pub turn_number: u32,
    pub check_url: String,
    pub estimated_seconds: u64,
    pub poll_advice: String,
}

impl SubmissionAck {
    pub fn accepted(
        session_name: &str,
        turn_number: u32,
        public_base_url: &str,
        perspectives: u32,
        seconds_per_perspective: u64,
    ) -> Self {
        Self {
            status: "accepted".to_string(),
            session_name: session_name.to_string(),
            turn_number,
            check_url: format!(
                "{}/api/jobs/{}/{}",
                public_base_url.trim_end_matches('/'),
                session_name,
                turn_number
            ),
            estimated_seconds: u64::from(perspectives.max(1)) * seconds_per_perspective,
            poll_advice: format!(
                "Poll checkUrl every {} seconds until status is complete or error.",
                POLL_ADVICE_SECS
            ),
        }
    }
}
