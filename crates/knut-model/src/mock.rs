// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;

use crate::{
    provider::ProviderStream, ChatRequest, ChatResponse, FunctionCall, ModelInfo, Provider,
    ProviderEvent, ProviderInfo, ToolCallRequest, Usage,
};

/// A pre-scripted provider.  Each call to `chat`/`chat_streaming` pops the
/// next event script from the front of the queue, letting tests specify exact
/// sequences — including tool calls — without network access.
pub struct ScriptedProvider {
    scripts: Mutex<Vec<Vec<ProviderEvent>>>,
    streaming: bool,
    /// The last request seen, for assertions on what was sent.
    pub last_request: Arc<Mutex<Option<ChatRequest>>>,
}

impl ScriptedProvider {
    pub fn new(scripts: Vec<Vec<ProviderEvent>>) -> Self {
        Self {
            scripts: Mutex::new(scripts),
            streaming: true,
            last_request: Arc::new(Mutex::new(None)),
        }
    }

    /// A scripted provider that claims no streaming support, forcing the
    /// orchestrator down the synthesised-chunk fallback path.
    pub fn without_streaming(mut self) -> Self {
        self.streaming = false;
        self
    }

    /// Convenience: one turn that streams `chunks` then completes.
    pub fn content_chunks(chunks: Vec<&str>, usage: Option<Usage>) -> Self {
        let mut events: Vec<ProviderEvent> = chunks
            .into_iter()
            .map(|c| ProviderEvent::Content(c.to_string()))
            .collect();
        events.push(ProviderEvent::Complete(usage));
        Self::new(vec![events])
    }

    /// Convenience: a turn emitting one tool call, then a follow-up text turn.
    pub fn tool_then_text(
        call_id: impl Into<String>,
        tool: impl Into<String>,
        arguments: impl Into<String>,
        final_text: impl Into<String>,
    ) -> Self {
        Self::new(vec![
            vec![
                ProviderEvent::ToolCalls(vec![ToolCallRequest {
                    id: call_id.into(),
                    function: FunctionCall {
                        name: tool.into(),
                        arguments: arguments.into(),
                    },
                }]),
                ProviderEvent::Complete(None),
            ],
            vec![
                ProviderEvent::Content(final_text.into()),
                ProviderEvent::Complete(None),
            ],
        ])
    }

    fn next_script(&self) -> Vec<ProviderEvent> {
        let mut scripts = self.scripts.lock().unwrap();
        if scripts.is_empty() {
            vec![
                ProviderEvent::Content("[no more scripts]".into()),
                ProviderEvent::Complete(None),
            ]
        } else {
            scripts.remove(0)
        }
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn id(&self) -> &str {
        "mock"
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "mock".into(),
            name: "Scripted mock".into(),
            description: "Deterministic provider for tests".into(),
            requires_auth: false,
            auth_url: None,
            models: vec![ModelInfo {
                id: "mock-model".into(),
                name: "Mock".into(),
                description: "Scripted responses".into(),
                context_length: 128_000,
                supports_tools: true,
                supports_streaming: true,
                cost_in: None,
                cost_out: None,
            }],
        }
    }

    async fn is_authenticated(&self) -> bool {
        true
    }

    async fn chat(&self, req: &ChatRequest) -> anyhow::Result<ChatResponse> {
        *self.last_request.lock().unwrap() = Some(req.clone());
        let mut resp = ChatResponse::default();
        for event in self.next_script() {
            match event {
                ProviderEvent::Content(text) => resp.content.push_str(&text),
                ProviderEvent::ToolCalls(calls) => resp.tool_calls.extend(calls),
                ProviderEvent::Complete(usage) => resp.usage = usage,
                ProviderEvent::Error(msg) => anyhow::bail!("{msg}"),
            }
        }
        Ok(resp)
    }

    fn supports_streaming(&self) -> bool {
        self.streaming
    }

    async fn chat_streaming(&self, req: &ChatRequest) -> anyhow::Result<ProviderStream> {
        *self.last_request.lock().unwrap() = Some(req.clone());
        let events = self.next_script();
        let (tx, rx) = mpsc::channel(crate::wire::STREAM_CHANNEL_CAPACITY);
        tokio::spawn(async move {
            for event in events {
                if tx.send(event).await.is_err() {
                    return;
                }
            }
        });
        Ok(ReceiverStream::new(rx))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
