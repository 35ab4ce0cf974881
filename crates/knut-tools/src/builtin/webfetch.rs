// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolContext, ToolResult};

const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// HTTP GET of a URL.  Text content types come back verbatim (HTML is
/// converted to readable text); anything else is summarised by content type
/// and length.
pub struct WebFetchTool;

#[async_trait]
impl Tool for WebFetchTool {
    fn id(&self) -> &str {
        "webfetch"
    }

    fn description(&self) -> &str {
        "Fetch content from web URLs (http/https only)"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "url": {
                    "type": "string",
                    "description": "The URL to fetch content from"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Request timeout in seconds (default 30)"
                }
            },
            "required": ["url"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let Some(url) = args.get("url").and_then(|v| v.as_str()) else {
            return Ok(ToolResult::error("webfetch", "missing required parameter 'url'"));
        };
        let timeout = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);

        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Ok(ToolResult::error(
                "webfetch",
                format!("Unsupported URL scheme: {url}"),
            ));
        }

        debug!(url, timeout, "webfetch tool");

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout))
            .build()
        {
            Ok(c) => c,
            Err(e) => return Ok(ToolResult::error("webfetch", format!("client error: {e}"))),
        };

        let resp = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return Ok(ToolResult::error("webfetch", "fetch cancelled"));
            }
            resp = client.get(url).send() => match resp {
                Ok(r) => r,
                Err(e) => {
                    return Ok(ToolResult::error("webfetch", format!("Request failed: {e}")));
                }
            },
        };

        let status = resp.status();
        if status.as_u16() >= 400 {
            return Ok(ToolResult::error(
                "webfetch",
                format!("HTTP {}: {}", status.as_u16(), status.canonical_reason().unwrap_or("")),
            ));
        }

        let content_type = resp
            .headers()
            .get("content-type")
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_lowercase();
        let content_length = resp.content_length();

        let is_text = content_type.contains("text/")
            || content_type.contains("application/json")
            || content_type.contains("application/xml");

        let content = if is_text {
            let body = match resp.text().await {
                Ok(b) => b,
                Err(e) => return Ok(ToolResult::error("webfetch", format!("read error: {e}"))),
            };
            if content_type.contains("text/html") {
                html2text::from_read(body.as_bytes(), 100)
            } else {
                body
            }
        } else {
            let length = content_length
                .map(|n| n.to_string())
                .unwrap_or_else(|| "unknown".into());
            format!("Binary content ({content_type}, {length} bytes)")
        };

        Ok(ToolResult::new(format!("GET {url}"), content)
            .with_metadata("url", json!(url))
            .with_metadata("status", json!(status.as_u16()))
            .with_metadata("content_type", json!(content_type)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new("s1", "m1", "/tmp")
    }

    #[tokio::test]
    async fn rejects_non_http_schemes() {
        let t = WebFetchTool;
        for url in ["ftp://host/file", "file:///etc/passwd", "not-a-url"] {
            let out = t.execute(json!({"url": url}), &ctx()).await.unwrap();
            assert!(out.is_error(), "{url} should be rejected");
            assert!(out.output.contains("Unsupported URL scheme"));
        }
    }

    #[tokio::test]
    async fn missing_url_is_error() {
        let out = WebFetchTool.execute(json!({}), &ctx()).await.unwrap();
        assert!(out.is_error());
    }

    #[tokio::test]
    async fn unreachable_host_is_error_result() {
        // Port 9 (discard) — connection refused immediately.
        let out = WebFetchTool
            .execute(
                json!({"url": "http://127.0.0.1:9/nope", "timeout": 2}),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(out.is_error());
        assert!(out.output.contains("Request failed"));
    }
}
