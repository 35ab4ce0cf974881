// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! The chat orchestrator: assemble context, invoke the provider, interleave
//! provider output with tool executions, persist, emit.
//!
//! One turn runs as a spawned task feeding a bounded chunk queue.  The
//! consumer reads [`StreamChunk`]s in exactly the order they were enqueued;
//! a consumer that stops reading blocks the producer instead of growing a
//! buffer.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use knut_config::Config;
use knut_model::{
    ChatMessage, ChatRequest, Provider, ProviderEvent, ProviderRegistry, ToolCallRequest, Usage,
};
use knut_session::{Message, Role as SessionRole, SessionStore, ToolState, ToolStatus};
use knut_tools::{ToolContext, ToolRegistry};

use crate::{prompts, ChatError, ModeRegistry, StreamChunk};

/// Capacity of the chunk queue between the turn task and the consumer.
const CHUNK_QUEUE_CAPACITY: usize = 32;

/// Maximum model invocations per turn.  The model gets this many chances to
/// follow tool results with further tool calls before the turn is closed.
const MAX_MODEL_TURNS: usize = 8;

/// Size of synthesised content chunks when a provider has no streaming.
const SYNTH_CHUNK_CHARS: usize = 20;

/// Pacing delay between synthesised chunks.
const DEFAULT_SYNTH_PACING: Duration = Duration::from_millis(100);

/// One user turn to run against a session.
#[derive(Debug, Clone)]
pub struct TurnRequest {
    pub session_id: String,
    pub provider_id: String,
    pub model_id: String,
    pub mode: String,
    pub message: String,
}

/// Handle to a running turn: the cancellation trigger and the chunk stream.
pub struct TurnHandle {
    pub cancel: CancellationToken,
    pub chunks: mpsc::Receiver<StreamChunk>,
}

/// Why a turn stopped before its normal completion.
enum Abort {
    Cancelled,
    Failed(String),
    /// The consumer dropped the receiver; nothing left to do.
    ReceiverGone,
}

#[derive(Clone)]
pub struct Orchestrator {
    providers: Arc<ProviderRegistry>,
    tools: Arc<ToolRegistry>,
    sessions: Arc<SessionStore>,
    modes: Arc<ModeRegistry>,
    config: Arc<Config>,
    workspace_root: PathBuf,
    synth_pacing: Duration,
}

impl Orchestrator {
    pub fn new(
        providers: Arc<ProviderRegistry>,
        tools: Arc<ToolRegistry>,
        sessions: Arc<SessionStore>,
        modes: Arc<ModeRegistry>,
        config: Arc<Config>,
        workspace_root: PathBuf,
    ) -> Self {
        Self {
            providers,
            tools,
            sessions,
            modes,
            config,
            workspace_root,
            synth_pacing: DEFAULT_SYNTH_PACING,
        }
    }

    /// Override the synthesised-stream pacing (tests).
    pub fn with_synth_pacing(mut self, pacing: Duration) -> Self {
        self.synth_pacing = pacing;
        self
    }

    /// Start a turn.  Returns immediately; chunks arrive on the handle.
    pub fn chat(&self, turn: TurnRequest) -> TurnHandle {
        let cancel = CancellationToken::new();
        let (tx, rx) = mpsc::channel(CHUNK_QUEUE_CAPACITY);
        let this = self.clone();
        let token = cancel.clone();
        tokio::spawn(async move {
            this.run_turn(turn, tx, token).await;
        });
        TurnHandle { cancel, chunks: rx }
    }

    async fn run_turn(
        &self,
        turn: TurnRequest,
        tx: mpsc::Sender<StreamChunk>,
        cancel: CancellationToken,
    ) {
        let mut assistant = Message::new(&turn.session_id, SessionRole::Assistant);
        let outcome = self.drive_turn(&turn, &tx, &cancel, &mut assistant).await;

        let persist_assistant = match outcome {
            Ok(usage) => {
                let _ = tx.send(StreamChunk::Complete(usage)).await;
                true
            }
            Err(Abort::Cancelled) => {
                let _ = tx
                    .send(StreamChunk::Error(ChatError::Cancelled.to_string()))
                    .await;
                let _ = tx.send(StreamChunk::Complete(None)).await;
                !assistant.parts.is_empty()
            }
            Err(Abort::Failed(msg)) => {
                let _ = tx.send(StreamChunk::Error(msg)).await;
                let _ = tx.send(StreamChunk::Complete(None)).await;
                !assistant.parts.is_empty()
            }
            Err(Abort::ReceiverGone) => false,
        };

        if persist_assistant {
            // The draft was created before the user message was persisted;
            // stamp it now so timestamp ordering matches emission order.
            assistant.timestamp = chrono::Utc::now();
            if let Err(e) = self.sessions.add_message(&turn.session_id, &assistant).await {
                // Persistence failures never affect the turn's visible output.
                warn!(session = %turn.session_id, error = %e, "failed to persist assistant message");
            }
        }
    }

    async fn drive_turn(
        &self,
        turn: &TurnRequest,
        tx: &mpsc::Sender<StreamChunk>,
        cancel: &CancellationToken,
        assistant: &mut Message,
    ) -> Result<Option<Usage>, Abort> {
        let mode = self
            .modes
            .get(&turn.mode)
            .ok_or_else(|| Abort::Failed(ChatError::UnknownMode(turn.mode.clone()).to_string()))?
            .clone();
        let provider = self.providers.get(&turn.provider_id).ok_or_else(|| {
            Abort::Failed(ChatError::UnknownProvider(turn.provider_id.clone()).to_string())
        })?;
        if self.sessions.get(&turn.session_id).await.is_none() {
            return Err(Abort::Failed(
                ChatError::SessionNotFound(turn.session_id.clone()).to_string(),
            ));
        }

        debug!(session = %turn.session_id, provider = %turn.provider_id,
               model = %turn.model_id, mode = %turn.mode, "starting turn");

        // Persist the user message up front; the assistant message follows on
        // completion.
        let user_msg = Message::user(&turn.session_id, &turn.message);
        if let Err(e) = self.sessions.add_message(&turn.session_id, &user_msg).await {
            warn!(session = %turn.session_id, error = %e, "failed to persist user message");
        }

        // System context, then prior history, then the new user message.
        let system =
            prompts::assemble(&turn.model_id, &mode.system_prompt, &self.workspace_root, &self.config);
        let mut messages: Vec<ChatMessage> =
            system.iter().map(|s| ChatMessage::system(s.clone())).collect();
        for m in self.sessions.get_messages(&turn.session_id).await {
            if m.id == user_msg.id {
                continue;
            }
            let text = m.text_content();
            match m.role {
                SessionRole::User => messages.push(ChatMessage::user(text)),
                SessionRole::Assistant if !text.is_empty() => {
                    messages.push(ChatMessage::assistant(text))
                }
                _ => {}
            }
        }
        messages.push(ChatMessage::user(&turn.message));

        let tools = self.tools.list_available(&mode.allowed_tools);
        let tool_schemas = ToolRegistry::to_schema(&tools);

        let mut final_usage: Option<Usage> = None;

        for round in 0..MAX_MODEL_TURNS {
            let req = ChatRequest {
                messages: messages.clone(),
                model: turn.model_id.clone(),
                temperature: mode.temperature,
                max_tokens: mode.max_tokens,
                tools: tool_schemas.clone(),
                stream: provider.supports_streaming(),
            };

            let (text, tool_calls, usage) = self
                .one_model_turn(provider.as_ref(), &req, tx, cancel, assistant)
                .await?;

            if !text.is_empty() {
                messages.push(ChatMessage::assistant(text));
            }
            if usage.is_some() {
                final_usage = usage;
            }

            if tool_calls.is_empty() {
                break;
            }

            debug!(round, count = tool_calls.len(), "executing tool calls");
            messages.push(ChatMessage::assistant_tool_calls(tool_calls.clone()));

            // Tool calls run sequentially in emission order so the
            // conversation the model sees next matches what it asked for.
            for call in &tool_calls {
                self.run_tool_call(turn, call, tx, cancel, assistant, &mut messages)
                    .await?;
            }
        }

        Ok(final_usage)
    }

    /// One provider invocation: stream when supported, otherwise call the
    /// blocking API and synthesise pacing.  Returns the accumulated text,
    /// the tool calls (emission order), and usage if reported.
    ///
    /// Text already streamed is committed to the assistant draft on every
    /// exit path, so a cancelled or failed turn persists its partial output.
    async fn one_model_turn(
        &self,
        provider: &dyn Provider,
        req: &ChatRequest,
        tx: &mpsc::Sender<StreamChunk>,
        cancel: &CancellationToken,
        assistant: &mut Message,
    ) -> Result<(String, Vec<ToolCallRequest>, Option<Usage>), Abort> {
        let commit = |assistant: &mut Message, text: &str| {
            if !text.is_empty() {
                assistant.push_text(text);
            }
        };

        if provider.supports_streaming() {
            let mut stream = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Abort::Cancelled),
                result = provider.chat_streaming(req) => {
                    result.map_err(|e| Abort::Failed(format!("{e:#}")))?
                }
            };

            let mut text = String::new();
            let mut calls: Vec<ToolCallRequest> = Vec::new();
            loop {
                let event = tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        commit(assistant, &text);
                        return Err(Abort::Cancelled);
                    }
                    event = stream.next() => event,
                };
                match event {
                    Some(ProviderEvent::Content(delta)) => {
                        text.push_str(&delta);
                        send(tx, StreamChunk::Content(delta)).await?;
                    }
                    Some(ProviderEvent::ToolCalls(c)) => calls.extend(c),
                    Some(ProviderEvent::Complete(usage)) => {
                        commit(assistant, &text);
                        return Ok((text, calls, usage));
                    }
                    Some(ProviderEvent::Error(msg)) => {
                        commit(assistant, &text);
                        return Err(Abort::Failed(msg));
                    }
                    // Producer ended without a terminal event; close the turn
                    // with what arrived rather than hanging.
                    None => {
                        commit(assistant, &text);
                        return Ok((text, calls, None));
                    }
                }
            }
        } else {
            send(tx, StreamChunk::Status("Generating response...".into())).await?;
            let resp = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Abort::Cancelled),
                result = provider.chat(req) => {
                    result.map_err(|e| Abort::Failed(format!("{e:#}")))?
                }
            };

            // Synthesise streaming by slicing the content into small chunks
            // with a pacing delay; cancellation lands between chunks.
            let mut emitted = String::new();
            for chunk in slice_chars(&resp.content, SYNTH_CHUNK_CHARS) {
                emitted.push_str(&chunk);
                send(tx, StreamChunk::Content(chunk)).await?;
                tokio::select! {
                    biased;
                    _ = cancel.cancelled() => {
                        commit(assistant, &emitted);
                        return Err(Abort::Cancelled);
                    }
                    _ = tokio::time::sleep(self.synth_pacing) => {}
                }
            }
            commit(assistant, &resp.content);
            Ok((resp.content, resp.tool_calls, resp.usage))
        }
    }

    /// Dispatch one tool call: emit `ToolStart`, execute under the turn's
    /// cancellation token, emit `ToolResult`/`ToolError`, record the call on
    /// the assistant message, and append the tool-role message the next model
    /// round will see.
    async fn run_tool_call(
        &self,
        turn: &TurnRequest,
        call: &ToolCallRequest,
        tx: &mpsc::Sender<StreamChunk>,
        cancel: &CancellationToken,
        assistant: &mut Message,
        messages: &mut Vec<ChatMessage>,
    ) -> Result<(), Abort> {
        let name = &call.function.name;
        send(
            tx,
            StreamChunk::ToolStart {
                call_id: call.id.clone(),
                name: name.clone(),
            },
        )
        .await?;

        let args: Value =
            serde_json::from_str(&call.function.arguments).unwrap_or(Value::Null);
        let args_map = args.as_object().cloned().unwrap_or_default();

        let mut ctx = ToolContext::new(&turn.session_id, &assistant.id, &self.workspace_root)
            .with_cancel(cancel.clone());
        ctx.call_id = call.id.clone();
        let result = self.tools.execute(name, args, &ctx).await;

        if cancel.is_cancelled() {
            return Err(Abort::Cancelled);
        }

        let status = if result.is_error() {
            send(
                tx,
                StreamChunk::ToolError {
                    call_id: call.id.clone(),
                    message: result.output.clone(),
                },
            )
            .await?;
            ToolStatus::Error
        } else {
            send(
                tx,
                StreamChunk::ToolResult {
                    call_id: call.id.clone(),
                    output: result.output.clone(),
                },
            )
            .await?;
            ToolStatus::Completed
        };

        assistant.push_tool(
            name,
            args_map,
            ToolState {
                status,
                title: Some(result.title.clone()),
                output: Some(result.output.clone()),
                metadata: result.metadata.clone(),
            },
        );
        messages.push(ChatMessage::tool_result(&call.id, &result.output));
        Ok(())
    }

    /// One-shot, tool-free completion that names the session after its first
    /// user message.
    pub async fn generate_title(
        &self,
        provider_id: &str,
        model_id: &str,
        first_user_message: &str,
    ) -> anyhow::Result<String> {
        let provider = self
            .providers
            .get(provider_id)
            .ok_or_else(|| ChatError::UnknownProvider(provider_id.to_string()))?;
        let mut messages: Vec<ChatMessage> = prompts::title(provider_id)
            .into_iter()
            .map(ChatMessage::system)
            .collect();
        messages.push(ChatMessage::user(first_user_message));
        let resp = provider
            .chat(&ChatRequest {
                messages,
                model: model_id.to_string(),
                max_tokens: Some(64),
                ..ChatRequest::default()
            })
            .await?;
        Ok(resp.content.trim().to_string())
    }
}

async fn send(tx: &mpsc::Sender<StreamChunk>, chunk: StreamChunk) -> Result<(), Abort> {
    tx.send(chunk).await.map_err(|_| Abort::ReceiverGone)
}

/// Split `s` into chunks of at most `n` characters, respecting char
/// boundaries.
fn slice_chars(s: &str, n: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut current = String::new();
    for (i, c) in s.chars().enumerate() {
        current.push(c);
        if (i + 1) % n == 0 {
            chunks.push(std::mem::take(&mut current));
        }
    }
    if !current.is_empty() {
        chunks.push(current);
    }
    chunks
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
