// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Shared OpenAI chat-completions wire machinery.
//!
//! The openai and github-copilot drivers speak the same `/chat/completions`
//! JSON + SSE format; this module holds the message serialisation, the SSE
//! line parser, and the producer task that folds SSE deltas into
//! [`ProviderEvent`]s over a bounded channel.

use std::collections::BTreeMap;

use futures::StreamExt;
use serde_json::{json, Value};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tracing::warn;

use crate::{
    ChatResponse, FunctionCall, ProviderEvent, ProviderStream, Role, ToolCallRequest, Usage,
};

/// Capacity of the bounded channel between a stream producer task and the
/// consumer.  Matches the orchestrator's chunk queue.
pub(crate) const STREAM_CHANNEL_CAPACITY: usize = 32;

fn role_str(r: Role) -> &'static str {
    match r {
        Role::System => "system",
        Role::User => "user",
        Role::Assistant => "assistant",
        Role::Tool => "tool",
    }
}

/// Convert the request history into the OpenAI wire-format JSON array.
pub(crate) fn to_openai_messages(messages: &[crate::ChatMessage]) -> Vec<Value> {
    messages
        .iter()
        .map(|m| {
            let mut v = json!({
                "role": role_str(m.role),
                "content": m.content,
            });
            if !m.tool_calls.is_empty() {
                let calls: Vec<Value> = m
                    .tool_calls
                    .iter()
                    .map(|tc| {
                        json!({
                            "id": tc.id,
                            "type": "function",
                            "function": {
                                "name": tc.function.name,
                                "arguments": tc.function.arguments,
                            }
                        })
                    })
                    .collect();
                v["tool_calls"] = json!(calls);
            }
            if let Some(id) = &m.tool_call_id {
                v["tool_call_id"] = json!(id);
            }
            v
        })
        .collect()
}

/// Parse a non-streaming chat-completions response body.
pub(crate) fn parse_openai_response(body: &Value) -> ChatResponse {
    let choice = &body["choices"][0];
    let message = &choice["message"];
    let content = message["content"].as_str().unwrap_or("").to_string();

    let tool_calls = message["tool_calls"]
        .as_array()
        .map(|calls| {
            calls
                .iter()
                .filter_map(|tc| {
                    let name = tc["function"]["name"].as_str()?;
                    Some(ToolCallRequest {
                        id: tc["id"].as_str().unwrap_or("").to_string(),
                        function: FunctionCall {
                            name: name.to_string(),
                            arguments: tc["function"]["arguments"]
                                .as_str()
                                .unwrap_or("{}")
                                .to_string(),
                        },
                    })
                })
                .collect()
        })
        .unwrap_or_default();

    ChatResponse {
        content,
        tool_calls,
        usage: parse_usage(&body["usage"]),
        finish_reason: choice["finish_reason"].as_str().map(str::to_string),
    }
}

pub(crate) fn parse_usage(usage: &Value) -> Option<Usage> {
    if usage.is_null() {
        return None;
    }
    Some(Usage {
        prompt: usage["prompt_tokens"].as_u64().unwrap_or(0) as u32,
        completion: usage["completion_tokens"].as_u64().unwrap_or(0) as u32,
        total: usage["total_tokens"].as_u64().unwrap_or(0) as u32,
    })
}

/// One decoded SSE delta, before tool-call accumulation.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum SseDelta {
    Content(String),
    ToolCallFragment {
        index: u32,
        id: String,
        name: String,
        arguments: String,
    },
    Usage(Usage),
    Done,
}

/// Drain all complete `\n`-terminated SSE lines from `buf` and parse them.
///
/// A trailing incomplete line stays in `buf` so the next TCP chunk can extend
/// it — a single SSE event may be split across packets.
pub(crate) fn drain_sse_lines(buf: &mut String) -> Vec<SseDelta> {
    let mut deltas = Vec::new();
    while let Some(nl_pos) = buf.find('\n') {
        let line = buf[..nl_pos].trim_end_matches('\r').to_string();
        *buf = buf[nl_pos + 1..].to_string();
        if let Some(delta) = parse_sse_data_line(&line) {
            deltas.push(delta);
        }
    }
    deltas
}

/// Parse a single complete SSE `data:` line.  Empty lines, comments, and
/// unparseable payloads yield `None`.
fn parse_sse_data_line(line: &str) -> Option<SseDelta> {
    let data = line.strip_prefix("data: ")?.trim();
    if data.is_empty() {
        return None;
    }
    if data == "[DONE]" {
        return Some(SseDelta::Done);
    }
    let v: Value = serde_json::from_str(data).ok()?;
    parse_sse_chunk(&v)
}

fn parse_sse_chunk(v: &Value) -> Option<SseDelta> {
    // Usage-only chunk (stream_options.include_usage)
    if let Some(usage) = v.get("usage").filter(|u| !u.is_null()) {
        return parse_usage(usage).map(SseDelta::Usage);
    }

    let delta = &v["choices"][0]["delta"];

    if let Some(tool_calls) = delta.get("tool_calls") {
        if let Some(tc) = tool_calls.get(0) {
            return Some(SseDelta::ToolCallFragment {
                index: tc["index"].as_u64().unwrap_or(0) as u32,
                id: tc["id"].as_str().unwrap_or("").to_string(),
                name: tc["function"]["name"].as_str().unwrap_or("").to_string(),
                arguments: tc["function"]["arguments"].as_str().unwrap_or("").to_string(),
            });
        }
    }

    if let Some(text) = delta.get("content").and_then(|c| c.as_str()) {
        if !text.is_empty() {
            return Some(SseDelta::Content(text.to_string()));
        }
    }

    None
}

/// Accumulates parallel tool-call fragments keyed by their stream index.
#[derive(Default)]
pub(crate) struct ToolCallAccumulator {
    pending: BTreeMap<u32, (String, String, String)>,
}

impl ToolCallAccumulator {
    pub(crate) fn push(&mut self, index: u32, id: String, name: String, arguments: String) {
        let entry = self.pending.entry(index).or_default();
        if !id.is_empty() {
            entry.0 = id;
        }
        if !name.is_empty() {
            entry.1 = name;
        }
        entry.2.push_str(&arguments);
    }

    /// Finish accumulation, ordered by stream index.  Calls without a name
    /// cannot be dispatched and are dropped; an empty id gets a synthetic
    /// fallback so the turn can still complete.
    pub(crate) fn finish(self) -> Vec<ToolCallRequest> {
        self.pending
            .into_values()
            .enumerate()
            .filter_map(|(i, (id, name, args))| {
                if name.is_empty() {
                    warn!("dropping tool call with empty name from model");
                    return None;
                }
                let id = if id.is_empty() {
                    format!("call_synthetic_{i}")
                } else {
                    id
                };
                Some(ToolCallRequest {
                    id,
                    function: FunctionCall {
                        name,
                        arguments: if args.is_empty() { "{}".into() } else { args },
                    },
                })
            })
            .collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.pending.is_empty()
    }
}

/// Spawn a producer task that reads the SSE body of `resp` and forwards
/// [`ProviderEvent`]s over a bounded channel.
///
/// Exactly one terminal event is sent: `Complete` after `[DONE]` (or clean
/// EOF), `Error` on a transport failure mid-stream.  Accumulated tool calls
/// are flushed as a single `ToolCalls` list right before `Complete`.
pub(crate) fn spawn_sse_producer(resp: reqwest::Response) -> ProviderStream {
    let (tx, rx) = mpsc::channel(STREAM_CHANNEL_CAPACITY);
    tokio::spawn(async move {
        let mut bytes = resp.bytes_stream();
        let mut buf = String::new();
        let mut acc = ToolCallAccumulator::default();
        let mut usage: Option<Usage> = None;

        while let Some(chunk) = bytes.next().await {
            let chunk = match chunk {
                Ok(b) => b,
                Err(e) => {
                    let _ = tx.send(ProviderEvent::Error(format!("stream error: {e}"))).await;
                    return;
                }
            };
            buf.push_str(&String::from_utf8_lossy(&chunk));
            for delta in drain_sse_lines(&mut buf) {
                match delta {
                    SseDelta::Content(text) => {
                        if tx.send(ProviderEvent::Content(text)).await.is_err() {
                            return;
                        }
                    }
                    SseDelta::ToolCallFragment { index, id, name, arguments } => {
                        acc.push(index, id, name, arguments);
                    }
                    SseDelta::Usage(u) => usage = Some(u),
                    SseDelta::Done => {
                        finish_stream(&tx, acc, usage).await;
                        return;
                    }
                }
            }
        }
        // Body ended without a [DONE] sentinel — still terminate cleanly.
        finish_stream(&tx, acc, usage).await;
    });
    ReceiverStream::new(rx)
}

async fn finish_stream(
    tx: &mpsc::Sender<ProviderEvent>,
    acc: ToolCallAccumulator,
    usage: Option<Usage>,
) {
    if !acc.is_empty() {
        let calls = acc.finish();
        if !calls.is_empty() && tx.send(ProviderEvent::ToolCalls(calls)).await.is_err() {
            return;
        }
    }
    let _ = tx.send(ProviderEvent::Complete(usage)).await;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ChatMessage;

    // ── Message serialisation ─────────────────────────────────────────────────

    #[test]
    fn plain_messages_serialize_role_and_content() {
        let msgs = to_openai_messages(&[ChatMessage::system("sys"), ChatMessage::user("hi")]);
        assert_eq!(msgs[0]["role"], "system");
        assert_eq!(msgs[0]["content"], "sys");
        assert_eq!(msgs[1]["role"], "user");
    }

    #[test]
    fn tool_calls_serialize_as_function_array() {
        let call = ToolCallRequest {
            id: "c1".into(),
            function: FunctionCall {
                name: "bash".into(),
                arguments: r#"{"command":"ls"}"#.into(),
            },
        };
        let msgs = to_openai_messages(&[ChatMessage::assistant_tool_calls(vec![call])]);
        let tc = &msgs[0]["tool_calls"][0];
        assert_eq!(tc["id"], "c1");
        assert_eq!(tc["type"], "function");
        assert_eq!(tc["function"]["name"], "bash");
    }

    #[test]
    fn tool_result_carries_tool_call_id() {
        let msgs = to_openai_messages(&[ChatMessage::tool_result("c1", "output text")]);
        assert_eq!(msgs[0]["role"], "tool");
        assert_eq!(msgs[0]["tool_call_id"], "c1");
        assert_eq!(msgs[0]["content"], "output text");
    }

    // ── Response parsing ──────────────────────────────────────────────────────

    #[test]
    fn parse_response_extracts_content_and_usage() {
        let body = json!({
            "choices": [{
                "message": { "content": "hello" },
                "finish_reason": "stop"
            }],
            "usage": { "prompt_tokens": 3, "completion_tokens": 5, "total_tokens": 8 }
        });
        let resp = parse_openai_response(&body);
        assert_eq!(resp.content, "hello");
        assert_eq!(resp.finish_reason.as_deref(), Some("stop"));
        assert_eq!(resp.usage.unwrap().total, 8);
    }

    #[test]
    fn parse_response_extracts_tool_calls() {
        let body = json!({
            "choices": [{
                "message": {
                    "content": null,
                    "tool_calls": [{
                        "id": "call_1",
                        "type": "function",
                        "function": { "name": "read", "arguments": "{\"file_path\":\"x\"}" }
                    }]
                },
                "finish_reason": "tool_calls"
            }]
        });
        let resp = parse_openai_response(&body);
        assert!(resp.content.is_empty());
        assert_eq!(resp.tool_calls.len(), 1);
        assert_eq!(resp.tool_calls[0].function.name, "read");
    }

    // ── SSE parsing ───────────────────────────────────────────────────────────

    #[test]
    fn sse_content_delta_parses() {
        let mut buf = String::from(
            "data: {\"choices\":[{\"delta\":{\"content\":\"Hi\"}}]}\n",
        );
        let deltas = drain_sse_lines(&mut buf);
        assert_eq!(deltas, vec![SseDelta::Content("Hi".into())]);
    }

    #[test]
    fn sse_done_sentinel_parses() {
        let mut buf = String::from("data: [DONE]\n");
        assert_eq!(drain_sse_lines(&mut buf), vec![SseDelta::Done]);
    }

    #[test]
    fn incomplete_line_stays_buffered() {
        let mut buf = String::from("data: {\"choices\":[{\"delta\":{\"con");
        assert!(drain_sse_lines(&mut buf).is_empty());
        assert!(!buf.is_empty());

        buf.push_str("tent\":\"x\"}}]}\n");
        let deltas = drain_sse_lines(&mut buf);
        assert_eq!(deltas, vec![SseDelta::Content("x".into())]);
        assert!(buf.is_empty());
    }

    #[test]
    fn sse_tool_call_fragment_parses() {
        let mut buf = String::from(
            "data: {\"choices\":[{\"delta\":{\"tool_calls\":[{\"index\":0,\"id\":\"c1\",\"function\":{\"name\":\"bash\",\"arguments\":\"{\\\"co\"}}]}}]}\n",
        );
        let deltas = drain_sse_lines(&mut buf);
        match &deltas[0] {
            SseDelta::ToolCallFragment { index, id, name, arguments } => {
                assert_eq!(*index, 0);
                assert_eq!(id, "c1");
                assert_eq!(name, "bash");
                assert_eq!(arguments, "{\"co");
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn sse_usage_chunk_parses() {
        let mut buf = String::from(
            "data: {\"choices\":[],\"usage\":{\"prompt_tokens\":10,\"completion_tokens\":2,\"total_tokens\":12}}\n",
        );
        let deltas = drain_sse_lines(&mut buf);
        assert_eq!(
            deltas,
            vec![SseDelta::Usage(Usage { prompt: 10, completion: 2, total: 12 })]
        );
    }

    #[test]
    fn non_data_lines_ignored() {
        let mut buf = String::from(": comment\n\nevent: ping\n");
        assert!(drain_sse_lines(&mut buf).is_empty());
    }

    // ── Tool-call accumulation ────────────────────────────────────────────────

    #[test]
    fn accumulator_joins_argument_fragments() {
        let mut acc = ToolCallAccumulator::default();
        acc.push(0, "c1".into(), "bash".into(), "{\"comm".into());
        acc.push(0, String::new(), String::new(), "and\":\"ls\"}".into());
        let calls = acc.finish();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].function.arguments, "{\"command\":\"ls\"}");
    }

    #[test]
    fn accumulator_orders_by_index() {
        let mut acc = ToolCallAccumulator::default();
        acc.push(1, "c2".into(), "read".into(), "{}".into());
        acc.push(0, "c1".into(), "bash".into(), "{}".into());
        let calls = acc.finish();
        assert_eq!(calls[0].id, "c1");
        assert_eq!(calls[1].id, "c2");
    }

    #[test]
    fn accumulator_drops_nameless_calls() {
        let mut acc = ToolCallAccumulator::default();
        acc.push(0, "c1".into(), String::new(), "{}".into());
        assert!(acc.finish().is_empty());
    }

    #[test]
    fn accumulator_substitutes_synthetic_id() {
        let mut acc = ToolCallAccumulator::default();
        acc.push(0, String::new(), "bash".into(), "{}".into());
        let calls = acc.finish();
        assert_eq!(calls[0].id, "call_synthetic_0");
    }

    #[test]
    fn accumulator_empty_arguments_become_empty_object() {
        let mut acc = ToolCallAccumulator::default();
        acc.push(0, "c1".into(), "bash".into(), String::new());
        assert_eq!(acc.finish()[0].function.arguments, "{}");
    }
}
