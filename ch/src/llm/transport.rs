//! HTTP send loop shared by the provider clients

use std::time::Duration;

use reqwest::{Client, RequestBuilder, Response};
use tracing::{debug, warn};

use super::LlmError;

/// Maximum number of retries for transient errors
pub const MAX_RETRIES: u32 = 3;

/// Initial backoff delay for retries
pub const INITIAL_BACKOFF_MS: u64 = 1000;

/// Seconds to wait on a 429 without a usable retry-after header
const DEFAULT_RETRY_AFTER_SECS: u64 = 60;

/// Build the shared HTTP client with the configured timeout
pub fn http_client(timeout: Duration) -> Result<Client, LlmError> {
    Client::builder().timeout(timeout).build().map_err(LlmError::Network)
}

/// Backoff before retry `attempt` (1-based)
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_millis(INITIAL_BACKOFF_MS * 2u64.pow(attempt.saturating_sub(1)))
}

/// Send a request built by `build`, retrying transient failures
///
/// Network errors and statuses accepted by `retryable` are retried with
/// exponential backoff up to `MAX_RETRIES` times. A 429 is returned at once as
/// `RateLimited`. Any other non-success status becomes `ApiError`.
pub async fn send_with_retry<B>(build: B, retryable: fn(u16) -> bool) -> Result<Response, LlmError>
where
    B: Fn() -> RequestBuilder,
{
    let mut last_error = None;
    for attempt in 0..=MAX_RETRIES {
        if attempt > 0 {
            let wait = backoff(attempt);
            warn!(attempt, backoff_ms = %wait.as_millis(), "send_with_retry: retrying after transient error");
            tokio::time::sleep(wait).await;
        }

        let response = match build().send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(attempt, error = %e, "send_with_retry: network error");
                last_error = Some(LlmError::Network(e));
                continue;
            }
        };

        let status = response.status().as_u16();

        if status == 429 {
            debug!("send_with_retry: rate limited (429)");
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .unwrap_or(DEFAULT_RETRY_AFTER_SECS);
            return Err(LlmError::RateLimited {
                retry_after: Duration::from_secs(retry_after),
            });
        }

        if retryable(status) && attempt < MAX_RETRIES {
            let text = response.text().await.unwrap_or_default();
            debug!(attempt, status, "send_with_retry: retryable error");
            last_error = Some(LlmError::ApiError { status, message: text });
            continue;
        }

        if !response.status().is_success() {
            debug!(%status, "send_with_retry: API error");
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::ApiError { status, message: text });
        }

        debug!("send_with_retry: success");
        return Ok(response);
    }

    Err(last_error.unwrap_or_else(|| LlmError::InvalidResponse("Max retries exceeded".to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backoff_doubles() {
        assert_eq!(backoff(1), Duration::from_millis(1000));
        assert_eq!(backoff(2), Duration::from_millis(2000));
        assert_eq!(backoff(3), Duration::from_millis(4000));
    }
}
