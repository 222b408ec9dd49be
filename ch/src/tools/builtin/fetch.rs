//! fetch tool - retrieve a URL as readable text

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::tools::{Tool, ToolContext, ToolResult};

/// Responses larger than this are refused
const MAX_BODY_BYTES: usize = 1_000_000;

/// Converted content is cut to this many characters
const MAX_OUTPUT_CHARS: usize = 50_000;

const USER_AGENT: &str = concat!("chorus/", env!("CARGO_PKG_VERSION"), " (fetch tool)");

/// Fetch content from a URL, converting HTML to markdown
pub struct FetchTool {
    http: reqwest::Client,
}

impl FetchTool {
    pub fn new() -> Self {
        debug!("FetchTool::new: called");
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .user_agent(USER_AGENT)
            .build()
            .unwrap_or_default();
        Self { http }
    }
}

impl Default for FetchTool {
    fn default() -> Self {
        Self::new()
    }
}

/// Keep the first `max_chars` characters and note how much was dropped
fn truncate_chars(content: String, max_chars: usize) -> String {
    let total = content.chars().count();
    if total <= max_chars {
        return content;
    }
    let kept: String = content.chars().take(max_chars).collect();
    format!("{}...\n\n[truncated, {} chars total]", kept, total)
}

/// Turn a response body into text the model can read
fn render_body(content_type: &str, body: String) -> String {
    if content_type.contains("text/html") || content_type.contains("application/xhtml") {
        debug!("render_body: converting HTML to markdown");
        html2md::rewrite_html(&body, false)
    } else if content_type.contains("application/json") {
        match serde_json::from_str::<Value>(&body) {
            Ok(json) => serde_json::to_string_pretty(&json).unwrap_or(body),
            Err(_) => body,
        }
    } else {
        body
    }
}

#[async_trait]
impl Tool for FetchTool {
    fn name(&self) -> &'static str {
        "fetch"
    }

    fn description(&self) -> &'static str {
        "Fetch content from a URL. HTML is converted to markdown; long pages are truncated."
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "http:// or https:// URL to fetch"
                }
            },
            "required": ["url"]
        })
    }

    async fn execute(&self, input: Value, ctx: &ToolContext) -> ToolResult {
        let Some(url) = input["url"].as_str() else {
            return ToolResult::error("url is required");
        };
        debug!(%url, exec_id = %ctx.exec_id, "FetchTool::execute: called");

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return ToolResult::error("URL must start with http:// or https://");
        }

        let response = match self.http.get(url).send().await {
            Ok(r) => r,
            Err(e) => {
                debug!(%e, "FetchTool::execute: HTTP request failed");
                return ToolResult::error(format!("Failed to fetch URL: {}", e));
            }
        };

        if !response.status().is_success() {
            return ToolResult::error(format!("HTTP error: {}", response.status()));
        }

        let content_type = response
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let body = match response.text().await {
            Ok(b) => b,
            Err(e) => return ToolResult::error(format!("Failed to read response: {}", e)),
        };

        if body.len() > MAX_BODY_BYTES {
            debug!(len = body.len(), "FetchTool::execute: response too large");
            return ToolResult::error("Response too large (> 1MB)");
        }

        let content = render_body(&content_type, body);
        ToolResult::success(truncate_chars(content, MAX_OUTPUT_CHARS))
    }
}
