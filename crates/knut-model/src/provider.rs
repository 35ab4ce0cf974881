// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use tokio_stream::wrappers::ReceiverStream;

use crate::{ChatRequest, ChatResponse, ProviderEvent, ProviderInfo};

/// Event stream backed by a bounded channel.  The producer task holds the
/// sender and emits exactly one terminal `Complete`/`Error`; a reader that
/// stops consuming makes the producer block at the next send rather than
/// buffer without bound.
pub type ProviderStream = ReceiverStream<ProviderEvent>;

/// An LLM backend.
///
/// `chat_streaming` is optional: the orchestrator checks
/// [`supports_streaming`](Provider::supports_streaming) and falls back to
/// [`chat`](Provider::chat), synthesising content chunks itself.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable provider id used in config, credentials, and model overrides.
    fn id(&self) -> &str;

    /// Descriptor with the available models.
    fn info(&self) -> ProviderInfo;

    /// Cheap authentication probe.  Key-based providers issue a tiny request;
    /// the device-flow provider checks that an access token can be minted.
    async fn is_authenticated(&self) -> bool;

    /// One complete (non-streaming) chat exchange.
    async fn chat(&self, req: &ChatRequest) -> anyhow::Result<ChatResponse>;

    fn supports_streaming(&self) -> bool {
        false
    }

    async fn chat_streaming(&self, _req: &ChatRequest) -> anyhow::Result<ProviderStream> {
        anyhow::bail!("provider {} does not implement streaming", self.id())
    }
}
