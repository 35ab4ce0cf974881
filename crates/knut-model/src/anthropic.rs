// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::debug;

use knut_auth::{Credential, CredentialStore};
use knut_config::ProviderConfig;

use crate::{
    provider::ProviderStream,
    wire::{self, ToolCallAccumulator},
    ChatRequest, ChatResponse, FunctionCall, ModelInfo, Provider, ProviderEvent, ProviderInfo,
    Role, ToolCallRequest, Usage,
};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com";
const API_VERSION: &str = "2023-06-01";
const API_KEY_ENV: &str = "ANTHROPIC_API_KEY";

/// Model used for the 1-token authentication probe.
const PROBE_MODEL: &str = "claude-3-5-haiku-20241022";

/// Anthropic Messages API driver.
///
/// The wire format differs from the common request shape in two ways: the
/// system prompt is a top-level `system` field rather than a message, and
/// tool interactions are `tool_use`/`tool_result` content blocks instead of
/// `tool_calls` arrays.  Both directions are mapped here.
pub struct AnthropicProvider {
    store: Arc<CredentialStore>,
    config: ProviderConfig,
    client: reqwest::Client,
}

impl AnthropicProvider {
    pub fn new(store: Arc<CredentialStore>, config: ProviderConfig) -> Self {
        Self {
            store,
            config,
            client: reqwest::Client::new(),
        }
    }

    fn base_url(&self) -> String {
        self.config
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.into())
            .trim_end_matches('/')
            .to_string()
    }

    async fn resolve_key(&self) -> Option<String> {
        if let Some(Credential::Api { key }) = self.store.get(self.id()).await {
            return Some(key);
        }
        if let Some(key) = &self.config.api_key {
            return Some(key.clone());
        }
        if let Some(env) = &self.config.api_key_env {
            if let Ok(key) = std::env::var(env) {
                return Some(key);
            }
        }
        std::env::var(API_KEY_ENV).ok()
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> Value {
        let (system, messages) = build_anthropic_messages(&req.messages);
        let mut body = json!({
            "model": req.model,
            "messages": messages,
            "max_tokens": req.max_tokens.unwrap_or(4096),
            "stream": stream,
        });
        if !system.is_empty() {
            body["system"] = json!(system);
        }
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if !req.tools.is_empty() {
            // Incoming tools use the OpenAI function-declaration shape; map to
            // Anthropic's {name, description, input_schema}.
            let tools: Vec<Value> = req
                .tools
                .iter()
                .filter_map(|t| {
                    let f = t.get("function")?;
                    Some(json!({
                        "name": f["name"],
                        "description": f["description"],
                        "input_schema": f["parameters"],
                    }))
                })
                .collect();
            body["tools"] = json!(tools);
        }
        body
    }

    async fn send(&self, body: &Value, stream: bool) -> anyhow::Result<reqwest::Response> {
        let key = match self.resolve_key().await {
            Some(k) => k,
            None => bail!("no anthropic credential; run `knut auth login` or set {API_KEY_ENV}"),
        };

        debug!(model = %body["model"], stream, "sending anthropic request");

        let mut builder = self
            .client
            .post(format!("{}/v1/messages", self.base_url()))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(body);
        if !stream {
            builder = builder.timeout(Duration::from_secs(120));
        }
        let resp = builder.send().await.context("anthropic request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("anthropic error {status}: {text}");
        }
        Ok(resp)
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
    fn id(&self) -> &str {
        "anthropic"
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "anthropic".into(),
            name: "Anthropic".into(),
            description: "Anthropic Messages API".into(),
            requires_auth: true,
            auth_url: Some("https://console.anthropic.com/settings/keys".into()),
            models: vec![
                ModelInfo {
                    id: "claude-sonnet-4-5".into(),
                    name: "Claude Sonnet 4.5".into(),
                    description: "Balanced coding model".into(),
                    context_length: 200_000,
                    supports_tools: true,
                    supports_streaming: true,
                    cost_in: Some(3.0),
                    cost_out: Some(15.0),
                },
                ModelInfo {
                    id: "claude-3-5-haiku-20241022".into(),
                    name: "Claude 3.5 Haiku".into(),
                    description: "Fast small model".into(),
                    context_length: 200_000,
                    supports_tools: true,
                    supports_streaming: true,
                    cost_in: Some(0.8),
                    cost_out: Some(4.0),
                },
            ],
        }
    }

    /// Probe with a 1-token completion; the Messages API has no cheap
    /// list-models endpoint.
    async fn is_authenticated(&self) -> bool {
        let Some(key) = self.resolve_key().await else {
            return false;
        };
        let body = json!({
            "model": PROBE_MODEL,
            "max_tokens": 1,
            "messages": [{ "role": "user", "content": "hi" }],
        });
        let resp = self
            .client
            .post(format!("{}/v1/messages", self.base_url()))
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .timeout(Duration::from_secs(15))
            .json(&body)
            .send()
            .await;
        matches!(resp, Ok(r) if r.status().is_success())
    }

    async fn chat(&self, req: &ChatRequest) -> anyhow::Result<ChatResponse> {
        let body = self.build_body(req, false);
        let resp = self.send(&body, false).await?;
        let v: Value = resp.json().await.context("parsing anthropic response")?;
        Ok(parse_anthropic_response(&v))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn chat_streaming(&self, req: &ChatRequest) -> anyhow::Result<ProviderStream> {
        let body = self.build_body(req, true);
        let resp = self.send(&body, true).await?;
        Ok(spawn_anthropic_sse_producer(resp))
    }
}

/// Convert request history to the Anthropic wire format.  Returns the
/// extracted system text and the conversation message array.
pub(crate) fn build_anthropic_messages(messages: &[crate::ChatMessage]) -> (String, Vec<Value>) {
    let mut system = String::new();
    let mut out: Vec<Value> = Vec::new();

    for m in messages {
        match m.role {
            Role::System => {
                // Providers that cache the leading system blocks receive at
                // most two system messages; join them with a blank line.
                if !system.is_empty() {
                    system.push_str("\n\n");
                }
                system.push_str(&m.content);
            }
            Role::Assistant if !m.tool_calls.is_empty() => {
                let blocks: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "type": "tool_use",
                            "id": tc.id,
                            "name": tc.function.name,
                            "input": serde_json::from_str::<Value>(&tc.function.arguments)
                                .unwrap_or(json!({})),
                        })
                    })
                    .collect();
                out.push(json!({ "role": "assistant", "content": blocks }));
            }
            Role::Assistant => {
                out.push(json!({ "role": "assistant", "content": m.content }));
            }
            Role::User => {
                out.push(json!({ "role": "user", "content": m.content }));
            }
            Role::Tool => {
                out.push(json!({
                    "role": "user",
                    "content": [{
                        "type": "tool_result",
                        "tool_use_id": m.tool_call_id.as_deref().unwrap_or(""),
                        "content": m.content,
                    }]
                }));
            }
        }
    }
    (system, out)
}

/// Parse a non-streaming Messages API response.
pub(crate) fn parse_anthropic_response(v: &Value) -> ChatResponse {
    let mut content = String::new();
    let mut tool_calls = Vec::new();

    if let Some(blocks) = v["content"].as_array() {
        for block in blocks {
            match block["type"].as_str().unwrap_or("") {
                "text" => content.push_str(block["text"].as_str().unwrap_or("")),
                "tool_use" => tool_calls.push(ToolCallRequest {
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    function: FunctionCall {
                        name: block["name"].as_str().unwrap_or("").to_string(),
                        arguments: block["input"].to_string(),
                    },
                }),
                _ => {}
            }
        }
    }

    let usage = v.get("usage").map(|u| {
        let prompt = u["input_tokens"].as_u64().unwrap_or(0) as u32;
        let completion = u["output_tokens"].as_u64().unwrap_or(0) as u32;
        Usage { prompt, completion, total: prompt + completion }
    });

    ChatResponse {
        content,
        tool_calls,
        usage,
        finish_reason: v["stop_reason"].as_str().map(str::to_string),
    }
}

/// One decoded Anthropic SSE event.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum AnthropicDelta {
    Text(String),
    ToolUseStart { index: u32, id: String, name: String },
    InputJson { index: u32, partial: String },
    InputTokens(u32),
    OutputTokens(u32),
    Stop,
}

pub(crate) fn parse_anthropic_event(v: &Value) -> Option<AnthropicDelta> {
    match v["type"].as_str().unwrap_or("") {
        "content_block_start" => {
            let block = &v["content_block"];
            if block["type"].as_str() == Some("tool_use") {
                return Some(AnthropicDelta::ToolUseStart {
                    index: v["index"].as_u64().unwrap_or(0) as u32,
                    id: block["id"].as_str().unwrap_or("").to_string(),
                    name: block["name"].as_str().unwrap_or("").to_string(),
                });
            }
            None
        }
        "content_block_delta" => {
            let delta = &v["delta"];
            match delta["type"].as_str().unwrap_or("") {
                "text_delta" => {
                    let text = delta["text"].as_str().unwrap_or("");
                    if text.is_empty() {
                        None
                    } else {
                        Some(AnthropicDelta::Text(text.to_string()))
                    }
                }
                "input_json_delta" => Some(AnthropicDelta::InputJson {
                    index: v["index"].as_u64().unwrap_or(0) as u32,
                    partial: delta["partial_json"].as_str().unwrap_or("").to_string(),
                }),
                _ => None,
            }
        }
        "message_start" => v["message"]["usage"]["input_tokens"]
            .as_u64()
            .map(|n| AnthropicDelta::InputTokens(n as u32)),
        "message_delta" => v["usage"]["output_tokens"]
            .as_u64()
            .map(|n| AnthropicDelta::OutputTokens(n as u32)),
        "message_stop" => Some(AnthropicDelta::Stop),
        _ => None,
    }
}

/// Producer task for the Anthropic SSE grammar; same channel contract as the
/// OpenAI-compatible producer.
fn spawn_anthropic_sse_producer(resp: reqwest::Response) -> ProviderStream {
    let (tx, rx) = mpsc::channel(wire::STREAM_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut bytes = resp.bytes_stream();
        let mut buf = String::new();
        let mut acc = ToolCallAccumulator::default();
        let mut input_tokens = 0u32;
        let mut output_tokens = 0u32;

        fn usage_from(input: u32, output: u32) -> Option<Usage> {
            if input > 0 || output > 0 {
                Some(Usage { prompt: input, completion: output, total: input + output })
            } else {
                None
            }
        }

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(ProviderEvent::Error(format!("stream error: {e}"))).await;
                    return;
                }
            };
            buf.push_str(&String::from_utf8_lossy(&chunk));
            while let Some(nl_pos) = buf.find('\n') {
                let line = buf[..nl_pos].trim_end_matches('\r').to_string();
                buf = buf[nl_pos + 1..].to_string();
                let Some(data) = line.strip_prefix("data: ") else {
                    continue;
                };
                let Ok(v) = serde_json::from_str::<Value>(data.trim()) else {
                    continue;
                };
                match parse_anthropic_event(&v) {
                    Some(AnthropicDelta::Text(text)) => {
                        if tx.send(ProviderEvent::Content(text)).await.is_err() {
                            return;
                        }
                    }
                    Some(AnthropicDelta::ToolUseStart { index, id, name }) => {
                        acc.push(index, id, name, String::new());
                    }
                    Some(AnthropicDelta::InputJson { index, partial }) => {
                        acc.push(index, String::new(), String::new(), partial);
                    }
                    Some(AnthropicDelta::InputTokens(n)) => input_tokens = n,
                    Some(AnthropicDelta::OutputTokens(n)) => output_tokens = n,
                    Some(AnthropicDelta::Stop) => {
                        if !acc.is_empty() {
                            let calls = acc.finish();
                            if !calls.is_empty()
                                && tx.send(ProviderEvent::ToolCalls(calls)).await.is_err()
                            {
                                return;
                            }
                        }
                        let _ = tx
                            .send(ProviderEvent::Complete(usage_from(input_tokens, output_tokens)))
                            .await;
                        return;
                    }
                    None => {}
                }
            }
        }
        // Body ended without message_stop — still terminate cleanly.
        if !acc.is_empty() {
            let calls = acc.finish();
            if !calls.is_empty() && tx.send(ProviderEvent::ToolCalls(calls)).await.is_err() {
                return;
            }
        }
        let _ = tx
            .send(ProviderEvent::Complete(usage_from(input_tokens, output_tokens)))
            .await;
    });
    ReceiverStream::new(rx)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;

    // ── Message building ──────────────────────────────────────────────────────

    #[test]
    fn system_messages_extracted_to_system_field() {
        let (system, msgs) = build_anthropic_messages(&[
            ChatMessage::system("first"),
            ChatMessage::system("second"),
            ChatMessage::user("hi"),
        ]);
        assert_eq!(system, "first\n\nsecond");
        assert_eq!(msgs.len(), 1);
        assert_eq!(msgs[0]["role"], "user");
    }

    #[test]
    fn tool_calls_become_tool_use_blocks() {
        let call = ToolCallRequest {
            id: "toolu_1".into(),
            function: FunctionCall {
                name: "bash".into(),
                arguments: r#"{"command":"ls"}"#.into(),
            },
        };
        let (_, msgs) = build_anthropic_messages(&[ChatMessage::assistant_tool_calls(vec![call])]);
        let block = &msgs[0]["content"][0];
        assert_eq!(block["type"], "tool_use");
        assert_eq!(block["id"], "toolu_1");
        assert_eq!(block["input"]["command"], "ls");
    }

    #[test]
    fn invalid_tool_arguments_become_empty_object() {
        let call = ToolCallRequest {
            id: "toolu_1".into(),
            function: FunctionCall { name: "bash".into(), arguments: "not json".into() },
        };
        let (_, msgs) = build_anthropic_messages(&[ChatMessage::assistant_tool_calls(vec![call])]);
        assert!(msgs[0]["content"][0]["input"].as_object().unwrap().is_empty());
    }

    #[test]
    fn tool_result_becomes_tool_result_block_with_user_role() {
        let (_, msgs) = build_anthropic_messages(&[ChatMessage::tool_result("toolu_1", "ok")]);
        assert_eq!(msgs[0]["role"], "user");
        let block = &msgs[0]["content"][0];
        assert_eq!(block["type"], "tool_result");
        assert_eq!(block["tool_use_id"], "toolu_1");
        assert_eq!(block["content"], "ok");
    }

    // ── Response parsing ──────────────────────────────────────────────────────

    #[test]
    fn parse_response_joins_text_blocks() {
        let v = json!({
            "content": [
                { "type": "text", "text": "Hello " },
                { "type": "text", "text": "world" }
            ],
            "stop_reason": "end_turn",
            "usage": { "input_tokens": 7, "output_tokens": 2 }
        });
        let resp = parse_anthropic_response(&v);
        assert_eq!(resp.content, "Hello world");
        assert_eq!(resp.finish_reason.as_deref(), Some("end_turn"));
        let usage = resp.usage.unwrap();
        assert_eq!(usage.total, 9);
    }

    #[test]
    fn parse_response_maps_tool_use_to_common_shape() {
        let v = json!({
            "content": [{
                "type": "tool_use",
                "id": "toolu_9",
                "name": "read",
                "input": { "file_path": "src/main.rs" }
            }],
            "stop_reason": "tool_use"
        });
        let resp = parse_anthropic_response(&v);
        assert_eq!(resp.tool_calls.len(), 1);
        let tc = &resp.tool_calls[0];
        assert_eq!(tc.id, "toolu_9");
        assert_eq!(tc.function.name, "read");
        let args: Value = serde_json::from_str(&tc.function.arguments).unwrap();
        assert_eq!(args["file_path"], "src/main.rs");
    }

    // ── SSE event parsing ─────────────────────────────────────────────────────

    #[test]
    fn text_delta_parses() {
        let v = json!({
            "type": "content_block_delta",
            "delta": { "type": "text_delta", "text": "chunk" }
        });
        assert_eq!(parse_anthropic_event(&v), Some(AnthropicDelta::Text("chunk".into())));
    }

    #[test]
    fn tool_use_start_parses_with_index() {
        let v = json!({
            "type": "content_block_start",
            "index": 1,
            "content_block": { "type": "tool_use", "id": "toolu_2", "name": "grep" }
        });
        assert_eq!(
            parse_anthropic_event(&v),
            Some(AnthropicDelta::ToolUseStart {
                index: 1,
                id: "toolu_2".into(),
                name: "grep".into()
            })
        );
    }

    #[test]
    fn input_json_delta_parses() {
        let v = json!({
            "type": "content_block_delta",
            "index": 1,
            "delta": { "type": "input_json_delta", "partial_json": "{\"pat" }
        });
        assert_eq!(
            parse_anthropic_event(&v),
            Some(AnthropicDelta::InputJson { index: 1, partial: "{\"pat".into() })
        );
    }

    #[test]
    fn message_lifecycle_events_parse() {
        let start = json!({
            "type": "message_start",
            "message": { "usage": { "input_tokens": 42 } }
        });
        assert_eq!(parse_anthropic_event(&start), Some(AnthropicDelta::InputTokens(42)));

        let delta = json!({ "type": "message_delta", "usage": { "output_tokens": 8 } });
        assert_eq!(parse_anthropic_event(&delta), Some(AnthropicDelta::OutputTokens(8)));

        let stop = json!({ "type": "message_stop" });
        assert_eq!(parse_anthropic_event(&stop), Some(AnthropicDelta::Stop));
    }

    #[test]
    fn ping_and_unknown_events_ignored() {
        assert_eq!(parse_anthropic_event(&json!({ "type": "ping" })), None);
        assert_eq!(parse_anthropic_event(&json!({ "type": "future_thing" })), None);
    }

    #[test]
    fn text_content_block_start_ignored() {
        let v = json!({
            "type": "content_block_start",
            "index": 0,
            "content_block": { "type": "text", "text": "" }
        });
        assert_eq!(parse_anthropic_event(&v), None);
    }

    // ── Body building ─────────────────────────────────────────────────────────

    #[test]
    fn body_maps_openai_tool_schema_to_input_schema() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::new(dir.path().join("auth.json")));
        let p = AnthropicProvider::new(store, ProviderConfig::default());
        let req = ChatRequest {
            messages: vec![ChatMessage::user("hi")],
            model: "claude-sonnet-4-5".into(),
            tools: vec![json!({
                "type": "function",
                "function": {
                    "name": "bash",
                    "description": "run a command",
                    "parameters": { "type": "object" }
                }
            })],
            ..ChatRequest::default()
        };
        let body = p.build_body(&req, false);
        let tool = &body["tools"][0];
        assert_eq!(tool["name"], "bash");
        assert_eq!(tool["input_schema"]["type"], "object");
        assert!(tool.get("function").is_none());
    }
}
