//! Fan-out dispatcher: one participant per instruction
//!
//! Participants never fail the stage. Each error is turned into a failed
//! `PerspectiveResult` in that participant's slot, so the output always has
//! one entry per instruction, in instruction order.

use futures::future::join_all;
use sessionstore::{Instruction, PerspectiveResult};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

use super::agent::{AgentTools, run_agent};
use super::{DispatchPolicy, StageContext, StageError};
use crate::llm::{CompletionRequest, Message};
use crate::prompts::ParticipantPrompt;

const SYSTEM_PROMPT: &str = "You are a focused analyst. Answer only from your assigned perspective.";

/// Run every participant under the given policy
pub async fn fan_out(
    ctx: &StageContext,
    prompt: &str,
    instructions: &[Instruction],
    policy: DispatchPolicy,
    tools_enabled: bool,
) -> Vec<PerspectiveResult> {
    debug!(count = instructions.len(), ?policy, tools_enabled, "fan_out: called");

    let results = match policy {
        DispatchPolicy::Serial => {
            let mut results = Vec::with_capacity(instructions.len());
            for instruction in instructions {
                results.push(participate(ctx, prompt, instruction, tools_enabled).await);
            }
            results
        }
        DispatchPolicy::Concurrent => {
            let limiter = (ctx.max_concurrency > 0).then(|| Semaphore::new(ctx.max_concurrency));
            let limiter = limiter.as_ref();
            join_all(instructions.iter().map(|instruction| async move {
                // A closed semaphore is impossible here; run unthrottled if it happens
                let _permit = match limiter {
                    Some(s) => s.acquire().await.ok(),
                    None => None,
                };
                participate(ctx, prompt, instruction, tools_enabled).await
            }))
            .await
        }
    };

    let failed = results.iter().filter(|r| r.failed).count();
    info!(total = results.len(), failed, "Fan-out complete");
    results
}

/// One participant, with its error folded into a failed result
async fn participate(
    ctx: &StageContext,
    prompt: &str,
    instruction: &Instruction,
    tools_enabled: bool,
) -> PerspectiveResult {
    match run_participant(ctx, prompt, instruction, tools_enabled).await {
        Ok(result) => result,
        Err(e) => {
            warn!(id = instruction.id, perspective = %instruction.perspective, error = %e, "Participant failed");
            PerspectiveResult::failure(instruction, e)
        }
    }
}

async fn run_participant(
    ctx: &StageContext,
    prompt: &str,
    instruction: &Instruction,
    tools_enabled: bool,
) -> Result<PerspectiveResult, StageError> {
    debug!(id = instruction.id, perspective = %instruction.perspective, "run_participant: called");
    let user = ctx
        .prompts
        .participant(&ParticipantPrompt {
            prompt,
            perspective: &instruction.perspective,
            instruction: &instruction.instruction,
            methodology: &instruction.methodology,
            tools_enabled,
        })
        .map_err(StageError::prompt)?;

    let request = CompletionRequest {
        system_prompt: SYSTEM_PROMPT.to_string(),
        messages: vec![Message::user(user)],
        tools: vec![],
        tool_choice: None,
        max_tokens: ctx.max_tokens,
    };

    let tool_ctx = ctx.tool_ctx.for_participant(format!("{}/{}", ctx.tool_ctx.exec_id, instruction.id));
    let tools = tools_enabled.then(|| AgentTools {
        executor: ctx.tools.as_ref(),
        ctx: &tool_ctx,
    });

    let outcome = run_agent(ctx.llm.as_ref(), request, tools, ctx.max_tool_iterations)
        .await
        .map_err(|e| StageError::llm(super::Stage::FanOut, e))?;
    let cost = ctx.pricing.cost(&ctx.model, &outcome.usage)?;

    let findings = if outcome.exhausted {
        outcome.bounded_finding()
    } else if outcome.text.trim().is_empty() {
        return Err(StageError::EmptyOutput {
            stage: super::Stage::FanOut,
        });
    } else {
        outcome.text.trim().to_string()
    };

    Ok(PerspectiveResult {
        id: instruction.id,
        perspective: instruction.perspective.clone(),
        instruction: instruction.instruction.clone(),
        findings,
        cost,
        turns_used: outcome.calls,
        failed: false,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::llm::{CompletionResponse, LlmError, ScriptedLlmClient, TokenUsage, ToolCall};
    use crate::pipeline::agent::BOUNDED_MARKER;
    use crate::pipeline::test_context;

    fn instructions(n: u32) -> Vec<Instruction> {
        (1..=n)
            .map(|id| Instruction {
                id,
                perspective: format!("Angle {}", id),
                instruction: format!("Investigate item {}", id),
                methodology: "Compare".to_string(),
            })
            .collect()
    }

    fn prompt_of(request: &CompletionRequest) -> String {
        request.first_user_text().unwrap_or_default().to_string()
    }

    #[tokio::test]
    async fn test_one_failure_keeps_every_slot() {
        let llm = Arc::new(ScriptedLlmClient::new(|req| {
            let result = if prompt_of(req).contains("Investigate item 2") {
                Err(LlmError::ApiError {
                    status: 500,
                    message: "boom".to_string(),
                })
            } else {
                Ok(CompletionResponse::text("ok", TokenUsage::new(10, 10)))
            };
            (Duration::ZERO, result)
        }));
        let ctx = test_context(llm);

        let results = fan_out(&ctx, "Q", &instructions(3), DispatchPolicy::Concurrent, false).await;
        assert_eq!(results.len(), 3);
        let ids: Vec<u32> = results.iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(!results[0].failed);
        assert!(results[1].failed);
        assert!(results[1].findings.starts_with(PerspectiveResult::FAILURE_MARKER));
        assert!(results[1].cost.is_zero());
        assert!(!results[2].failed);
    }

    #[tokio::test]
    async fn test_serial_runs_in_order() {
        let order = Arc::new(std::sync::Mutex::new(Vec::new()));
        let seen = order.clone();
        let llm = Arc::new(ScriptedLlmClient::new(move |req| {
            let text = prompt_of(req);
            let id = (1..=3).find(|i| text.contains(&format!("Investigate item {}", i))).unwrap_or(0);
            seen.lock().unwrap().push(id);
            // Later participants answer faster; serial dispatch must still go in order
            let delay = Duration::from_millis(30 - 10 * id as u64);
            (delay, Ok(CompletionResponse::text(format!("found {}", id), TokenUsage::new(1, 1))))
        }));
        let ctx = test_context(llm);

        let results = fan_out(&ctx, "Q", &instructions(3), DispatchPolicy::Serial, false).await;
        assert_eq!(*order.lock().unwrap(), vec![1, 2, 3]);
        assert_eq!(results[2].findings, "found 3");
    }

    #[tokio::test]
    async fn test_tool_loop_cap_is_bounded_finding() {
        let llm = Arc::new(ScriptedLlmClient::new(|_| {
            let call = ToolCall {
                id: "c1".to_string(),
                name: "read_file".to_string(),
                input: serde_json::json!({"path": "notes.md"}),
            };
            (Duration::ZERO, Ok(CompletionResponse::tool_use(vec![call], TokenUsage::new(5, 5))))
        }));
        let mut ctx = test_context(llm.clone());
        ctx.max_tool_iterations = 2;

        let results = fan_out(&ctx, "Q", &instructions(1), DispatchPolicy::Concurrent, true).await;
        assert!(!results[0].failed);
        assert!(results[0].findings.starts_with(BOUNDED_MARKER));
        assert_eq!(results[0].turns_used, 2);
        assert_eq!(results[0].cost.input_tokens, 10);
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_empty_answer_is_failure() {
        let llm = Arc::new(ScriptedLlmClient::new(|_| {
            (Duration::ZERO, Ok(CompletionResponse::text("   ", TokenUsage::new(1, 1))))
        }));
        let ctx = test_context(llm);

        let results = fan_out(&ctx, "Q", &instructions(2), DispatchPolicy::Concurrent, false).await;
        assert!(results.iter().all(|r| r.failed));
    }
}
