//! OpenAI Chat Completions client implementation

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

use super::transport::{http_client, send_with_retry};
use super::{
    CompletionRequest, CompletionResponse, ContentBlock, LlmClient, LlmError, Message, MessageContent, Role,
    StopReason, TokenUsage, ToolCall,
};
use crate::config::LlmConfig;

/// Check if an HTTP status code is retryable
fn is_retryable_status(status: u16) -> bool {
    matches!(status, 408 | 429 | 500 | 502 | 503 | 504)
}

/// OpenAI API client
pub struct OpenAIClient {
    model: String,
    api_key: String,
    base_url: String,
    http: Client,
    max_tokens: u32,
}

impl OpenAIClient {
    /// Create a client for `model` from configuration
    pub fn from_config(config: &LlmConfig, model: &str) -> Result<Self, LlmError> {
        debug!(%model, provider = %config.provider, "OpenAIClient::from_config: called");
        let api_key = config.api_key().map_err(|e| LlmError::Config(e.to_string()))?;
        let http = http_client(Duration::from_millis(config.timeout_ms))?;

        Ok(Self {
            model: model.to_string(),
            api_key,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            http,
            max_tokens: config.max_tokens,
        })
    }

    /// Reasoning-era models take max_completion_tokens instead of max_tokens
    fn uses_completion_tokens(&self) -> bool {
        self.model.starts_with("gpt-5") || self.model.starts_with("o1") || self.model.starts_with("o3")
    }

    /// Build the request body for the OpenAI API
    fn build_request_body(&self, request: &CompletionRequest) -> serde_json::Value {
        debug!(%self.model, %request.max_tokens, "build_request_body: called");

        let mut messages = vec![serde_json::json!({
            "role": "system",
            "content": request.system_prompt,
        })];
        messages.extend(convert_messages(&request.messages));

        let max_tokens = request.max_tokens.min(self.max_tokens);
        let mut body = serde_json::json!({
            "model": self.model,
            "messages": messages,
        });

        if self.uses_completion_tokens() {
            body["max_completion_tokens"] = serde_json::json!(max_tokens);
        } else {
            body["max_tokens"] = serde_json::json!(max_tokens);
        }

        if !request.tools.is_empty() {
            debug!(tool_count = %request.tools.len(), "build_request_body: adding tools");
            body["tools"] = serde_json::json!(request.tools.iter().map(|t| t.to_openai_schema()).collect::<Vec<_>>());
            body["tool_choice"] = match &request.tool_choice {
                Some(name) => serde_json::json!({"type": "function", "function": {"name": name}}),
                None => serde_json::json!("auto"),
            };
        }

        body
    }
}

/// Convert internal Message types to OpenAI API format
///
/// OpenAI requires one `tool` message per tool result, so a single internal
/// message carrying several results expands into several messages.
fn convert_messages(messages: &[Message]) -> Vec<serde_json::Value> {
    debug!(message_count = %messages.len(), "convert_messages: called");
    let mut result = Vec::new();

    for msg in messages {
        let role = match msg.role {
            Role::User => "user",
            Role::Assistant => "assistant",
        };

        let blocks = match &msg.content {
            MessageContent::Text(text) => {
                result.push(serde_json::json!({"role": role, "content": text}));
                continue;
            }
            MessageContent::Blocks(blocks) => blocks,
        };

        let mut tool_calls = Vec::new();
        let mut text_content = String::new();
        let mut had_results = false;

        for block in blocks {
            match block {
                ContentBlock::Text { text } => text_content.push_str(text),
                ContentBlock::ToolUse { id, name, input } => tool_calls.push(serde_json::json!({
                    "id": id,
                    "type": "function",
                    "function": {"name": name, "arguments": input.to_string()},
                })),
                ContentBlock::ToolResult {
                    tool_use_id, content, ..
                } => {
                    had_results = true;
                    result.push(serde_json::json!({
                        "role": "tool",
                        "tool_call_id": tool_use_id,
                        "content": content,
                    }));
                }
            }
        }

        if had_results {
            continue;
        }

        if !tool_calls.is_empty() {
            let mut assistant = serde_json::json!({"role": "assistant", "tool_calls": tool_calls});
            if !text_content.is_empty() {
                assistant["content"] = serde_json::json!(text_content);
            }
            result.push(assistant);
        } else {
            result.push(serde_json::json!({"role": role, "content": text_content}));
        }
    }

    result
}

/// Parse the OpenAI API response
fn parse_response(api_response: OpenAIResponse) -> CompletionResponse {
    debug!(choices = %api_response.choices.len(), "parse_response: called");
    let usage = api_response
        .usage
        .map(|u| TokenUsage {
            input_tokens: u.prompt_tokens,
            output_tokens: u.completion_tokens,
            cache_read_tokens: u.prompt_tokens_details.map(|d| d.cached_tokens).unwrap_or(0),
            cache_creation_tokens: 0,
        })
        .unwrap_or_default();

    let Some(choice) = api_response.choices.into_iter().next() else {
        return CompletionResponse {
            content: None,
            tool_calls: vec![],
            stop_reason: StopReason::EndTurn,
            usage,
        };
    };

    let tool_calls = choice
        .message
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(|tc| ToolCall {
            id: tc.id,
            name: tc.function.name,
            input: serde_json::from_str(&tc.function.arguments).unwrap_or(serde_json::json!({})),
        })
        .collect();

    CompletionResponse {
        content: choice.message.content,
        tool_calls,
        stop_reason: StopReason::from_openai(choice.finish_reason.as_deref()),
        usage,
    }
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
        debug!(%self.model, %request.max_tokens, "OpenAIClient::complete: called");
        let url = format!("{}/v1/chat/completions", self.base_url);
        let body = self.build_request_body(&request);

        let response = send_with_retry(
            || {
                self.http
                    .post(&url)
                    .header("Authorization", format!("Bearer {}", self.api_key))
                    .header("content-type", "application/json")
                    .json(&body)
            },
            is_retryable_status,
        )
        .await?;

        let api_response: OpenAIResponse = response.json().await?;
        Ok(parse_response(api_response))
    }
}

// OpenAI API response types

#[derive(Debug, Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
    usage: Option<OpenAIUsage>,
}

#[derive(Debug, Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessage,
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct OpenAIMessage {
    content: Option<String>,
    tool_calls: Option<Vec<OpenAIToolCall>>,
}

#[derive(Debug, Deserialize)]
struct OpenAIToolCall {
    id: String,
    function: OpenAIFunction,
}

#[derive(Debug, Deserialize)]
struct OpenAIFunction {
    name: String,
    arguments: String,
}

#[derive(Debug, Deserialize)]
struct OpenAIUsage {
    prompt_tokens: u64,
    completion_tokens: u64,
    prompt_tokens_details: Option<OpenAIPromptDetails>,
}

#[derive(Debug, Deserialize)]
struct OpenAIPromptDetails {
    #[serde(default)]
    cached_tokens: u64,
}
