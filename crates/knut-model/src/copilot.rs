// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use knut_auth::{github::EDITOR_HEADERS, CopilotTokenManager};

use crate::{
    provider::ProviderStream, wire, ChatRequest, ChatResponse, ModelInfo, Provider, ProviderInfo,
    Role,
};

const CHAT_URL: &str = "https://api.githubcopilot.com/chat/completions";

/// GitHub Copilot driver.  Speaks the OpenAI chat-completions wire format
/// against the Copilot endpoint; authentication runs through the device-flow
/// token manager, which mints short-lived access tokens from the stored
/// refresh token.
pub struct CopilotProvider {
    tokens: CopilotTokenManager,
    client: reqwest::Client,
    chat_url: String,
}

impl CopilotProvider {
    pub fn new(tokens: CopilotTokenManager) -> Self {
        Self {
            tokens,
            client: reqwest::Client::new(),
            chat_url: CHAT_URL.into(),
        }
    }

    /// Endpoint override for tests against a local HTTP stub.
    pub fn with_chat_url(tokens: CopilotTokenManager, chat_url: impl Into<String>) -> Self {
        Self {
            tokens,
            client: reqwest::Client::new(),
            chat_url: chat_url.into(),
        }
    }

    pub fn tokens(&self) -> &CopilotTokenManager {
        &self.tokens
    }

    fn build_body(&self, req: &ChatRequest, stream: bool) -> serde_json::Value {
        let mut body = json!({
            "model": req.model,
            "messages": wire::to_openai_messages(&req.messages),
            "stream": stream,
        });
        if let Some(t) = req.temperature {
            body["temperature"] = json!(t);
        }
        if let Some(mt) = req.max_tokens {
            body["max_tokens"] = json!(mt);
        }
        if !req.tools.is_empty() {
            body["tools"] = json!(req.tools);
        }
        if stream {
            body["stream_options"] = json!({ "include_usage": true });
        }
        body
    }

    async fn send(&self, req: &ChatRequest, stream: bool) -> anyhow::Result<reqwest::Response> {
        let access = match self.tokens.get_access_token(false).await {
            Some(t) => t,
            None => bail!("github copilot authentication required; run `knut auth login`"),
        };

        debug!(model = %req.model, stream, initiator = initiator(&req.messages),
               "sending copilot request");

        let mut builder = self
            .client
            .post(&self.chat_url)
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {access}"))
            .header("Openai-Intent", "conversation-edits")
            .header("X-Initiator", initiator(&req.messages));
        for (name, value) in EDITOR_HEADERS {
            builder = builder.header(name, value);
        }
        if !stream {
            builder = builder.timeout(Duration::from_secs(120));
        }
        let resp = builder
            .json(&self.build_body(req, stream))
            .send()
            .await
            .context("copilot request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("copilot error {status}: {text}");
        }
        Ok(resp)
    }
}

/// `agent` once the conversation already contains assistant or tool turns,
/// `user` on the opening request.
fn initiator(messages: &[crate::ChatMessage]) -> &'static str {
    let agentic = messages
        .iter()
        .any(|m| matches!(m.role, Role::Tool | Role::Assistant));
    if agentic {
        "agent"
    } else {
        "user"
    }
}

#[async_trait]
impl Provider for CopilotProvider {
    fn id(&self) -> &str {
        "github-copilot"
    }

    fn info(&self) -> ProviderInfo {
        // Billed via subscription, so all per-token costs are zero.
        let model = |id: &str, name: &str, ctx: u32, tools: bool| ModelInfo {
            id: id.into(),
            name: format!("{name} (Copilot)"),
            description: format!("GitHub Copilot's {name} model"),
            context_length: ctx,
            supports_tools: tools,
            supports_streaming: true,
            cost_in: Some(0.0),
            cost_out: Some(0.0),
        };
        ProviderInfo {
            id: "github-copilot".into(),
            name: "GitHub Copilot".into(),
            description: "GitHub Copilot chat API".into(),
            requires_auth: true,
            auth_url: Some("https://github.com/settings/copilot".into()),
            models: vec![
                model("gpt-4o", "GPT-4o", 128_000, true),
                model("gpt-4o-mini", "GPT-4o Mini", 128_000, true),
                model("o1-mini", "o1 Mini", 128_000, false),
                model("claude-sonnet-4-5", "Claude Sonnet 4.5", 200_000, true),
                model("claude-3-5-haiku", "Claude 3.5 Haiku", 200_000, true),
            ],
        }
    }

    async fn is_authenticated(&self) -> bool {
        self.tokens.is_authenticated().await
    }

    async fn chat(&self, req: &ChatRequest) -> anyhow::Result<ChatResponse> {
        let resp = self.send(req, false).await?;
        let body: serde_json::Value = resp.json().await.context("parsing copilot response")?;
        Ok(wire::parse_openai_response(&body))
    }

    fn supports_streaming(&self) -> bool {
        true
    }

    async fn chat_streaming(&self, req: &ChatRequest) -> anyhow::Result<ProviderStream> {
        let resp = self.send(req, true).await?;
        Ok(wire::spawn_sse_producer(resp))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
