//! Bounded agentic loop: call the model, run requested tools, feed results back

use tracing::{debug, warn};

use crate::llm::{CompletionRequest, CompletionResponse, ContentBlock, LlmClient, LlmError, Message, StopReason, TokenUsage};
use crate::tools::{ToolContext, ToolExecutor, ToolResult};

/// Prefix of the findings written when a participant runs out of rounds
pub const BOUNDED_MARKER: &str = "[bounded iteration limit exceeded";

const CONTINUE_PROMPT: &str = "Continue from where you left off. Your previous response was truncated.";

/// What a bounded loop produced
#[derive(Debug, Clone, Default)]
pub struct AgentOutcome {
    /// Final answer text, including any truncated-then-continued parts
    pub text: String,
    /// Usage summed over every model call
    pub usage: TokenUsage,
    /// Model calls made
    pub calls: u32,
    /// True when the round cap was hit before the model finished
    pub exhausted: bool,
}

impl AgentOutcome {
    /// Text for a loop that hit its cap, keeping any partial answer
    pub fn bounded_finding(&self) -> String {
        let marker = format!("{} after {} rounds]", BOUNDED_MARKER, self.calls);
        if self.text.trim().is_empty() {
            marker
        } else {
            format!("{}\n\n{}", marker, self.text.trim())
        }
    }
}

/// Tools offered to the model in a loop
pub struct AgentTools<'a> {
    pub executor: &'a ToolExecutor,
    pub ctx: &'a ToolContext,
}

/// Run the request until the model ends its turn or `max_rounds` calls are used
///
/// Every model call is one round, whether it asked for tools or continued a
/// truncated answer. A model error ends the loop and is returned as is.
pub async fn run_agent(
    llm: &dyn LlmClient,
    mut request: CompletionRequest,
    tools: Option<AgentTools<'_>>,
    max_rounds: u32,
) -> Result<AgentOutcome, LlmError> {
    let max_rounds = max_rounds.max(1);
    debug!(max_rounds, has_tools = tools.is_some(), "run_agent: called");

    if let Some(t) = &tools {
        request.tools = t.executor.definitions();
    }

    let mut outcome = AgentOutcome::default();
    let mut partial = String::new();

    loop {
        let response = llm.complete(request.clone()).await?;
        outcome.calls += 1;
        outcome.usage += response.usage;
        debug!(round = outcome.calls, stop_reason = ?response.stop_reason, "run_agent: response");

        request.messages.push(build_assistant_message(&response));

        match response.stop_reason {
            StopReason::ToolUse if !response.tool_calls.is_empty() => {
                partial.clear();
                // Tool results from the last round would never be read
                if outcome.calls >= max_rounds {
                    return Ok(exhausted(outcome, partial));
                }
                let results = match &tools {
                    Some(t) => t.executor.execute_all(&response.tool_calls, t.ctx).await,
                    None => response
                        .tool_calls
                        .iter()
                        .map(|c| (c.id.clone(), ToolResult::error("Tools are not available for this request")))
                        .collect(),
                };
                request.messages.push(build_tool_result_message(&results));
            }
            StopReason::MaxTokens => {
                if let Some(text) = &response.content {
                    partial.push_str(text);
                }
                if outcome.calls >= max_rounds {
                    return Ok(exhausted(outcome, partial));
                }
                request.messages.push(Message::user(CONTINUE_PROMPT));
            }
            _ => {
                if let Some(text) = &response.content {
                    partial.push_str(text);
                }
                outcome.text = partial;
                return Ok(outcome);
            }
        }
    }
}

fn exhausted(mut outcome: AgentOutcome, partial: String) -> AgentOutcome {
    warn!(calls = outcome.calls, "run_agent: round limit reached");
    outcome.text = partial;
    outcome.exhausted = true;
    outcome
}

/// Build assistant message from response
fn build_assistant_message(response: &CompletionResponse) -> Message {
    let mut blocks = Vec::new();

    if let Some(text) = &response.content {
        blocks.push(ContentBlock::text(text));
    }

    for call in &response.tool_calls {
        blocks.push(ContentBlock::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.input.clone(),
        });
    }

    Message::assistant_blocks(blocks)
}

fn build_tool_result_message(results: &[(String, ToolResult)]) -> Message {
    let blocks = results
        .iter()
        .map(|(id, result)| ContentBlock::tool_result(id, &result.content, result.is_error))
        .collect();
    Message::user_blocks(blocks)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::llm::{MockLlmClient, ToolCall};
    use crate::tools::Tool;

    fn tool_call(id: &str, name: &str) -> ToolCall {
        ToolCall {
            id: id.to_string(),
            name: name.to_string(),
            input: serde_json::json!({}),
        }
    }

    fn truncated(text: &str) -> CompletionResponse {
        CompletionResponse {
            content: Some(text.to_string()),
            tool_calls: vec![],
            stop_reason: StopReason::MaxTokens,
            usage: TokenUsage::new(5, 5),
        }
    }

    #[tokio::test]
    async fn test_plain_answer_single_round() {
        let llm = MockLlmClient::new(vec![CompletionResponse::text("done", TokenUsage::new(10, 2))]);
        let outcome = run_agent(&llm, CompletionRequest::simple("s", "u", 100), None, 4)
            .await
            .unwrap();

        assert_eq!(outcome.text, "done");
        assert_eq!(outcome.calls, 1);
        assert!(!outcome.exhausted);
        assert_eq!(outcome.usage.input_tokens, 10);
    }

    #[tokio::test]
    async fn test_tool_round_then_answer_accumulates_usage() {
        let llm = MockLlmClient::new(vec![
            CompletionResponse::tool_use(vec![tool_call("c1", "nothing_here")], TokenUsage::new(10, 1)),
            CompletionResponse::text("answer", TokenUsage::new(20, 3)),
        ]);
        let executor = ToolExecutor::empty();
        let ctx = ToolContext::new(None, "test");
        let tools = AgentTools {
            executor: &executor,
            ctx: &ctx,
        };

        let outcome = run_agent(&llm, CompletionRequest::simple("s", "u", 100), Some(tools), 4)
            .await
            .unwrap();

        assert_eq!(outcome.text, "answer");
        assert_eq!(outcome.calls, 2);
        assert_eq!(outcome.usage.input_tokens, 30);
        assert_eq!(outcome.usage.output_tokens, 4);
    }

    #[tokio::test]
    async fn test_round_cap_marks_exhausted() {
        let llm = MockLlmClient::new(vec![
            CompletionResponse::tool_use(vec![tool_call("c1", "fetch")], TokenUsage::new(1, 1)),
            CompletionResponse::tool_use(vec![tool_call("c2", "fetch")], TokenUsage::new(1, 1)),
            CompletionResponse::text("never reached", TokenUsage::new(1, 1)),
        ]);
        let executor = ToolExecutor::empty();
        let ctx = ToolContext::new(None, "test");

        let outcome = run_agent(
            &llm,
            CompletionRequest::simple("s", "u", 100),
            Some(AgentTools {
                executor: &executor,
                ctx: &ctx,
            }),
            2,
        )
        .await
        .unwrap();

        assert!(outcome.exhausted);
        assert_eq!(outcome.calls, 2);
        assert_eq!(outcome.usage.input_tokens, 2);
        assert_eq!(outcome.bounded_finding(), "[bounded iteration limit exceeded after 2 rounds]");
        assert_eq!(llm.call_count(), 2);
    }

    /// Tool that counts how often it runs
    struct CountingTool(Arc<AtomicUsize>);

    #[async_trait]
    impl Tool for CountingTool {
        fn name(&self) -> &'static str {
            "fetch"
        }

        fn description(&self) -> &'static str {
            "Counts calls"
        }

        fn input_schema(&self) -> serde_json::Value {
            serde_json::json!({"type": "object"})
        }

        async fn execute(&self, _input: serde_json::Value, _ctx: &ToolContext) -> ToolResult {
            self.0.fetch_add(1, Ordering::SeqCst);
            ToolResult::success("fetched")
        }
    }

    #[tokio::test]
    async fn test_tools_not_run_on_last_round() {
        let runs = Arc::new(AtomicUsize::new(0));
        let mut executor = ToolExecutor::empty();
        executor.add_tool(Box::new(CountingTool(runs.clone())));
        let ctx = ToolContext::new(None, "test");
        let llm = MockLlmClient::new(vec![
            CompletionResponse::tool_use(vec![tool_call("c1", "fetch")], TokenUsage::new(1, 1)),
            CompletionResponse::tool_use(vec![tool_call("c2", "fetch")], TokenUsage::new(1, 1)),
        ]);

        let outcome = run_agent(
            &llm,
            CompletionRequest::simple("s", "u", 100),
            Some(AgentTools {
                executor: &executor,
                ctx: &ctx,
            }),
            2,
        )
        .await
        .unwrap();

        assert!(outcome.exhausted);
        assert_eq!(outcome.calls, 2);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_truncated_last_round_keeps_partial_text() {
        let llm = MockLlmClient::new(vec![truncated("first half, "), truncated("more")]);
        let outcome = run_agent(&llm, CompletionRequest::simple("s", "u", 100), None, 2)
            .await
            .unwrap();

        assert!(outcome.exhausted);
        assert_eq!(outcome.text, "first half, more");
        assert_eq!(llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_truncated_answer_is_continued() {
        let llm = MockLlmClient::new(vec![
            truncated("first half, "),
            CompletionResponse::text("second half", TokenUsage::new(5, 5)),
        ]);
        let outcome = run_agent(&llm, CompletionRequest::simple("s", "u", 100), None, 4)
            .await
            .unwrap();

        assert_eq!(outcome.text, "first half, second half");
        assert_eq!(outcome.calls, 2);
    }

    #[tokio::test]
    async fn test_model_error_propagates() {
        let llm = MockLlmClient::new(vec![]);
        let result = run_agent(&llm, CompletionRequest::simple("s", "u", 100), None, 4).await;
        assert!(result.is_err());
    }
}
