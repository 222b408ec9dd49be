//! LLM client module
//!
//! Provider clients, request/response types and the price table.

use std::sync::Arc;

use tracing::debug;

mod anthropic;
pub mod client;
mod error;
mod openai;
mod pricing;
mod transport;
mod types;

pub use anthropic::AnthropicClient;
pub use client::LlmClient;
pub use client::mock::{MockLlmClient, ScriptedLlmClient};
pub use error::LlmError;
pub use openai::OpenAIClient;
pub use pricing::{Pricing, PricingError};
pub use types::{
    CompletionRequest, CompletionResponse, ContentBlock, Message, MessageContent, Role, StopReason, TokenUsage,
    ToolCall, ToolDefinition,
};

use crate::config::LlmConfig;

/// Create an LLM client for `model` using the configured provider
pub fn create_client(config: &LlmConfig, model: &str) -> Result<Arc<dyn LlmClient>, LlmError> {
    debug!(provider = %config.provider, %model, "create_client: called");
    match config.provider.as_str() {
        "anthropic" => Ok(Arc::new(AnthropicClient::from_config(config, model)?)),
        "openai" => Ok(Arc::new(OpenAIClient::from_config(config, model)?)),
        other => {
            debug!(provider = %other, "create_client: unknown provider");
            Err(LlmError::Config(format!(
                "Unknown LLM provider: '{}'. Supported: anthropic, openai",
                other
            )))
        }
    }
}

/// Source of clients, one per requested model
///
/// Jobs name their model per request, so the executor asks for a client at
/// run time rather than holding a single one.
pub trait LlmProvider: Send + Sync {
    fn client_for(&self, model: &str) -> Result<Arc<dyn LlmClient>, LlmError>;
}

/// Builds real provider clients from config
pub struct ConfigLlmProvider {
    config: LlmConfig,
}

impl ConfigLlmProvider {
    pub fn new(config: LlmConfig) -> Self {
        Self { config }
    }
}

impl LlmProvider for ConfigLlmProvider {
    fn client_for(&self, model: &str) -> Result<Arc<dyn LlmClient>, LlmError> {
        create_client(&self.config, model)
    }
}

/// Hands out the same client for every model
pub struct FixedLlmProvider {
    client: Arc<dyn LlmClient>,
}

impl FixedLlmProvider {
    pub fn new(client: Arc<dyn LlmClient>) -> Self {
        Self { client }
    }
}

impl LlmProvider for FixedLlmProvider {
    fn client_for(&self, model: &str) -> Result<Arc<dyn LlmClient>, LlmError> {
        debug!(%model, "FixedLlmProvider::client_for: called");
        Ok(self.client.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unknown_provider_rejected() {
        let config = LlmConfig {
            provider: "carrier-pigeon".to_string(),
            ..Default::default()
        };
        let err = create_client(&config, "any").err().unwrap();
        assert!(err.to_string().contains("carrier-pigeon"));
    }

    #[test]
    fn test_missing_key_is_config_error() {
        let config = LlmConfig {
            api_key_env: "CHORUS_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..Default::default()
        };
        assert!(matches!(create_client(&config, "claude-sonnet-4"), Err(LlmError::Config(_))));
    }
}
