//! LlmClient trait definition

use async_trait::async_trait;

use super::{CompletionRequest, CompletionResponse, LlmError};

/// Stateless LLM client - each call is independent
///
/// No conversation state is kept between calls; the caller passes the full
/// message history in every request.
#[async_trait]
pub trait LlmClient: Send + Sync {
    /// Send a single completion request and wait for the full response
    async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError>;
}

/// Test doubles shared by unit and integration tests
pub mod mock {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tracing::debug;

    /// Returns canned responses in order
    pub struct MockLlmClient {
        responses: Vec<CompletionResponse>,
        call_count: AtomicUsize,
    }

    impl MockLlmClient {
        pub fn new(responses: Vec<CompletionResponse>) -> Self {
            debug!(response_count = %responses.len(), "MockLlmClient::new: called");
            Self {
                responses,
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for MockLlmClient {
        async fn complete(&self, _request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            let idx = self.call_count.fetch_add(1, Ordering::SeqCst);
            debug!(%idx, "MockLlmClient::complete: called");
            self.responses.get(idx).cloned().ok_or_else(|| {
                debug!("MockLlmClient::complete: no more mock responses");
                LlmError::InvalidResponse("No more mock responses".to_string())
            })
        }
    }

    type Script = dyn Fn(&CompletionRequest) -> (Duration, Result<CompletionResponse, LlmError>) + Send + Sync;

    /// Answers each request from a closure, after an optional delay
    ///
    /// Useful when concurrent callers make the call order nondeterministic:
    /// the closure routes on request content instead of position.
    pub struct ScriptedLlmClient {
        script: Box<Script>,
        call_count: AtomicUsize,
    }

    impl ScriptedLlmClient {
        pub fn new<F>(script: F) -> Self
        where
            F: Fn(&CompletionRequest) -> (Duration, Result<CompletionResponse, LlmError>) + Send + Sync + 'static,
        {
            Self {
                script: Box::new(script),
                call_count: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl LlmClient for ScriptedLlmClient {
        async fn complete(&self, request: CompletionRequest) -> Result<CompletionResponse, LlmError> {
            self.call_count.fetch_add(1, Ordering::SeqCst);
            let (delay, result) = (self.script)(&request);
            debug!(delay_ms = %delay.as_millis(), "ScriptedLlmClient::complete: called");
            if !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }
            result
        }
    }

}
