// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::json;
use tracing::debug;

use knut_auth::{Credential, CredentialStore};
use knut_config::ProviderConfig;

use crate::{
    provider::ProviderStream, wire, ChatRequest, ChatResponse, ModelInfo, Provider, ProviderInfo,
};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";
const API_KEY_ENV: &str = "OPENAI_API_KEY";

/// OpenAI chat-completions driver.
pub struct OpenAiProvider {
    store: Arc<CredentialStore>,
    config: ProviderConfig,
    client: reqwest::Client,
}

impl OpenAiProvider {
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

    /// Resolve the API key: stored credential first, then config, then the
    /// environment fallback.
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

    async fn send(
        &self,
        req: &ChatRequest,
        stream: bool,
    ) -> anyhow::Result<reqwest::Response> {
        let key = match self.resolve_key().await {
            Some(k) => k,
            None => bail!("no openai credential; run `knut auth login` or set {API_KEY_ENV}"),
        };

        debug!(model = %req.model, stream, tool_count = req.tools.len(), "sending openai request");

        let mut builder = self
            .client
            .post(format!("{}/chat/completions", self.base_url()))
            .bearer_auth(key)
            .json(&self.build_body(req, stream));
        if !stream {
            builder = builder.timeout(Duration::from_secs(120));
        }
        let resp = builder.send().await.context("openai request failed")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let text = resp.text().await.unwrap_or_default();
            bail!("openai error {status}: {text}");
        }
        Ok(resp)
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn id(&self) -> &str {
        "openai"
    }

    fn info(&self) -> ProviderInfo {
        ProviderInfo {
            id: "openai".into(),
            name: "OpenAI".into(),
            description: "OpenAI chat-completions API".into(),
            requires_auth: true,
            auth_url: Some("https://platform.openai.com/api-keys".into()),
            models: vec![
                ModelInfo {
                    id: "gpt-4o".into(),
                    name: "GPT-4o".into(),
                    description: "Flagship multimodal model".into(),
                    context_length: 128_000,
                    supports_tools: true,
                    supports_streaming: true,
                    cost_in: Some(2.5),
                    cost_out: Some(10.0),
                },
                ModelInfo {
                    id: "gpt-4o-mini".into(),
                    name: "GPT-4o Mini".into(),
                    description: "Fast, inexpensive small model".into(),
                    context_length: 128_000,
                    supports_tools: true,
                    supports_streaming: true,
                    cost_in: Some(0.15),
                    cost_out: Some(0.6),
                },
                ModelInfo {
                    id: "o3-mini".into(),
                    name: "o3 Mini".into(),
                    description: "Reasoning model".into(),
                    context_length: 200_000,
                    supports_tools: true,
                    supports_streaming: true,
                    cost_in: Some(1.1),
                    cost_out: Some(4.4),
                },
            ],
        }
    }

    /// Probe with `GET /models` — the cheapest authenticated endpoint.
    async fn is_authenticated(&self) -> bool {
        let Some(key) = self.resolve_key().await else {
            return false;
        };
        let resp = self
            .client
            .get(format!("{}/models", self.base_url()))
            .bearer_auth(key)
            .timeout(Duration::from_secs(15))
            .send()
            .await;
        matches!(resp, Ok(r) if r.status().is_success())
    }

    async fn chat(&self, req: &ChatRequest) -> anyhow::Result<ChatResponse> {
        let resp = self.send(req, false).await?;
        let body: serde_json::Value = resp.json().await.context("parsing openai response")?;
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

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiProvider {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::new(dir.path().join("auth.json")));
        OpenAiProvider::new(store, ProviderConfig::default())
    }

    #[test]
    fn info_lists_models() {
        let p = provider();
        let info = p.info();
        assert_eq!(info.id, "openai");
        assert!(info.requires_auth);
        assert!(info.models.iter().any(|m| m.id == "gpt-4o"));
    }

    #[test]
    fn base_url_override_is_trimmed() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::new(dir.path().join("auth.json")));
        let p = OpenAiProvider::new(
            store,
            ProviderConfig {
                base_url: Some("http://localhost:8080/v1/".into()),
                ..ProviderConfig::default()
            },
        );
        assert_eq!(p.base_url(), "http://localhost:8080/v1");
    }

    #[tokio::test]
    async fn stored_credential_beats_config_key() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::new(dir.path().join("auth.json")));
        store
            .set("openai", Credential::Api { key: "stored".into() })
            .await
            .unwrap();
        let p = OpenAiProvider::new(
            store,
            ProviderConfig {
                api_key: Some("from-config".into()),
                ..ProviderConfig::default()
            },
        );
        assert_eq!(p.resolve_key().await.as_deref(), Some("stored"));
    }

    #[tokio::test]
    async fn config_key_used_when_store_empty() {
        let dir = tempfile::tempdir().unwrap();
        let store = Arc::new(CredentialStore::new(dir.path().join("auth.json")));
        let p = OpenAiProvider::new(
            store,
            ProviderConfig {
                api_key: Some("from-config".into()),
                ..ProviderConfig::default()
            },
        );
        assert_eq!(p.resolve_key().await.as_deref(), Some("from-config"));
    }

    #[test]
    fn body_includes_tools_and_stream_options() {
        let p = provider();
        let req = ChatRequest {
            messages: vec![crate::ChatMessage::user("hi")],
            model: "gpt-4o".into(),
            tools: vec![serde_json::json!({"type":"function","function":{"name":"bash"}})],
            stream: true,
            ..ChatRequest::default()
        };
        let body = p.build_body(&req, true);
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream"], true);
        assert!(body["tools"].is_array());
        assert_eq!(body["stream_options"]["include_usage"], true);
    }

    #[test]
    fn body_omits_optional_fields_when_unset() {
        let p = provider();
        let req = ChatRequest {
            messages: vec![crate::ChatMessage::user("hi")],
            model: "gpt-4o".into(),
            ..ChatRequest::default()
        };
        let body = p.build_body(&req, false);
        assert!(body.get("temperature").is_none());
        assert!(body.get("max_tokens").is_none());
        assert!(body.get("tools").is_none());
    }
}
