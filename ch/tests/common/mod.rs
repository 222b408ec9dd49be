#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chorus::config::Config;
use chorus::jobs::MemoryRegistry;
use chorus::llm::{
    CompletionRequest, CompletionResponse, FixedLlmProvider, LlmError, ScriptedLlmClient, TokenUsage, ToolCall,
};
use chorus::pipeline::SUBMIT_TOOL;
use chorus::service::ChorusService;
use tempfile::TempDir;

pub const PARTICIPANT_USAGE: (u64, u64) = (100, 50);
pub const EXPANSION_USAGE: (u64, u64) = (1000, 200);
pub const SYNTHESIS_USAGE: (u64, u64) = (500, 300);

/// Which pipeline step a request belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Expand,
    Participant(u32),
    Synthesize,
    Single,
}

pub fn step_of(request: &CompletionRequest) -> Step {
    if request.tool_choice.as_deref() == Some(SUBMIT_TOOL) {
        return Step::Expand;
    }
    let text = request.first_user_text().unwrap_or_default();
    if text.contains("Several analysts") {
        return Step::Synthesize;
    }
    if text.contains("one analyst in a panel") {
        let id = (1..=32)
            .rev()
            .find(|i| text.contains(&format!("Examine angle {}", i)))
            .unwrap_or(0);
        return Step::Participant(id);
    }
    Step::Single
}

pub fn expansion_response(n: u32) -> CompletionResponse {
    let list: Vec<_> = (1..=n)
        .map(|i| {
            serde_json::json!({
                "perspective": format!("Perspective {}", i),
                "instruction": format!("Examine angle {}", i),
                "methodology": "Reason from first principles"
            })
        })
        .collect();
    CompletionResponse::tool_use(
        vec![ToolCall {
            id: "submit".to_string(),
            name: SUBMIT_TOOL.to_string(),
            input: serde_json::json!({ "instructions": list }),
        }],
        TokenUsage::new(EXPANSION_USAGE.0, EXPANSION_USAGE.1),
    )
}

/// Canned answer for each step, with a fixed delay on participants
pub fn answer(request: &CompletionRequest, perspectives: u32, participant_delay: Duration) -> (Duration, Result<CompletionResponse, LlmError>) {
    match step_of(request) {
        Step::Expand => (Duration::ZERO, Ok(expansion_response(perspectives))),
        Step::Participant(id) => (
            participant_delay,
            Ok(CompletionResponse::text(
                format!("Finding {}", id),
                TokenUsage::new(PARTICIPANT_USAGE.0, PARTICIPANT_USAGE.1),
            )),
        ),
        Step::Synthesize => (
            Duration::ZERO,
            Ok(CompletionResponse::text(
                "Combined view",
                TokenUsage::new(SYNTHESIS_USAGE.0, SYNTHESIS_USAGE.1),
            )),
        ),
        Step::Single => (
            Duration::ZERO,
            Ok(CompletionResponse::text("Direct answer", TokenUsage::new(40, 20))),
        ),
    }
}

pub fn scripted(perspectives: u32, participant_delay: Duration) -> Arc<ScriptedLlmClient> {
    Arc::new(ScriptedLlmClient::new(move |req| answer(req, perspectives, participant_delay)))
}

pub fn provider(client: Arc<ScriptedLlmClient>) -> Arc<FixedLlmProvider> {
    Arc::new(FixedLlmProvider::new(client))
}

pub fn test_config(temp: &TempDir) -> Config {
    let mut config = Config::default();
    config.storage.data_dir = temp.path().join("data");
    config.jobs.heartbeat_secs = 1;
    config.jobs.poll_interval_secs = 1;
    config
}

pub fn service(config: Config) -> ChorusService {
    ChorusService::with_registry(Arc::new(config), Arc::new(MemoryRegistry::new())).unwrap()
}
