// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! GitHub Copilot device-flow authentication (RFC 8628 adapted to GitHub's
//! endpoints).
//!
//! The flow mints two kinds of token:
//! - the **refresh** token — the long-lived GitHub OAuth token returned when
//!   the user completes the device flow; stored in the credential file
//! - the **access** token — a short-lived Copilot API token exchanged from
//!   the refresh token; cached in the credential file with its expiry

use std::sync::Arc;

use anyhow::Context;
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::{Credential, CredentialStore};

const CLIENT_ID: &str = "Iv1.b507a08c87ecfe98";
const DEVICE_CODE_URL: &str = "https://github.com/login/device/code";
const ACCESS_TOKEN_URL: &str = "https://github.com/login/oauth/access_token";
const COPILOT_TOKEN_URL: &str = "https://api.github.com/copilot_internal/v2/token";

/// Fixed editor identification headers.  The Copilot token endpoint and the
/// chat endpoint both require this exact set.
pub const EDITOR_HEADERS: [(&str, &str); 4] = [
    ("User-Agent", "GitHubCopilotChat/0.26.7"),
    ("Editor-Version", "vscode/1.99.3"),
    ("Editor-Plugin-Version", "copilot-chat/0.26.7"),
    ("Copilot-Integration-Id", "vscode-chat"),
];

/// Result of starting device authorization.
#[derive(Debug, Clone)]
pub struct AuthorizeInfo {
    pub device_code: String,
    pub user_code: String,
    pub verification_url: String,
    /// Seconds the caller should wait between polls.
    pub interval_s: u64,
    pub expires_in_s: u64,
}

/// Outcome of one token poll.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Pending,
    /// The user approved the device; the OAuth token becomes our refresh handle.
    Success { refresh: String },
    Failed,
}

/// A minted Copilot access token with its expiry in epoch milliseconds.
#[derive(Debug, Clone)]
pub struct AccessInfo {
    pub refresh: String,
    pub access: String,
    pub expires: i64,
}

#[derive(Deserialize)]
struct DeviceCodeResponse {
    device_code: String,
    user_code: String,
    verification_uri: String,
    expires_in: u64,
    #[serde(default)]
    interval: u64,
}

#[derive(Deserialize)]
struct AccessTokenResponse {
    access_token: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct CopilotTokenResponse {
    token: String,
    /// Seconds since epoch — converted to milliseconds before storage.
    expires_at: i64,
}

/// Low-level device-flow HTTP client.
pub struct DeviceFlow {
    client: reqwest::Client,
    device_code_url: String,
    access_token_url: String,
    copilot_token_url: String,
}

impl Default for DeviceFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl DeviceFlow {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            device_code_url: DEVICE_CODE_URL.into(),
            access_token_url: ACCESS_TOKEN_URL.into(),
            copilot_token_url: COPILOT_TOKEN_URL.into(),
        }
    }

    /// Endpoint override for tests against a local HTTP stub.
    pub fn with_endpoints(
        device_code_url: impl Into<String>,
        access_token_url: impl Into<String>,
        copilot_token_url: impl Into<String>,
    ) -> Self {
        Self {
            client: reqwest::Client::new(),
            device_code_url: device_code_url.into(),
            access_token_url: access_token_url.into(),
            copilot_token_url: copilot_token_url.into(),
        }
    }

    /// Start device authorization: returns the user code to display and the
    /// device code to poll with.
    pub async fn authorize(&self) -> anyhow::Result<AuthorizeInfo> {
        let resp = self
            .client
            .post(&self.device_code_url)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("User-Agent", "GitHubCopilotChat/0.26.7")
            .json(&serde_json::json!({
                "client_id": CLIENT_ID,
                "scope": "read:user",
            }))
            .send()
            .await
            .context("device code request failed")?
            .error_for_status()
            .context("device code endpoint returned error")?;

        let data: DeviceCodeResponse = resp.json().await.context("parsing device code response")?;
        info!(user_code = %data.user_code, verification = %data.verification_uri,
              "device authorization started");
        Ok(AuthorizeInfo {
            device_code: data.device_code,
            user_code: data.user_code,
            verification_url: data.verification_uri,
            interval_s: if data.interval == 0 { 5 } else { data.interval },
            expires_in_s: data.expires_in,
        })
    }

    /// Poll the token endpoint once.  HTTP failures and OAuth errors other
    /// than `authorization_pending` map to `Failed`.
    pub async fn poll(&self, device_code: &str) -> anyhow::Result<PollOutcome> {
        let resp = self
            .client
            .post(&self.access_token_url)
            .header("Accept", "application/json")
            .header("Content-Type", "application/json")
            .header("User-Agent", "GitHubCopilotChat/0.26.7")
            .json(&serde_json::json!({
                "client_id": CLIENT_ID,
                "device_code": device_code,
                "grant_type": "urn:ietf:params:oauth:grant-type:device_code",
            }))
            .send()
            .await
            .context("token poll request failed")?;

        if !resp.status().is_success() {
            warn!(status = %resp.status(), "token poll failed");
            return Ok(PollOutcome::Failed);
        }

        let data: AccessTokenResponse = resp.json().await.context("parsing token poll response")?;

        if let Some(token) = data.access_token {
            info!("device flow completed");
            return Ok(PollOutcome::Success { refresh: token });
        }
        match data.error.as_deref() {
            Some("authorization_pending") | None => Ok(PollOutcome::Pending),
            Some(err) => {
                warn!(error = err, description = ?data.error_description, "device flow error");
                Ok(PollOutcome::Failed)
            }
        }
    }

    /// Exchange the refresh token for a short-lived Copilot access token.
    /// Non-2xx responses yield `None` rather than an error so callers can
    /// keep the stored refresh token.
    pub async fn access(&self, refresh: &str) -> anyhow::Result<Option<AccessInfo>> {
        let mut req = self
            .client
            .get(&self.copilot_token_url)
            .header("Accept", "application/json")
            .header("Authorization", format!("Bearer {refresh}"));
        for (name, value) in EDITOR_HEADERS {
            req = req.header(name, value);
        }

        let resp = req.send().await.context("copilot token request failed")?;
        if !resp.status().is_success() {
            warn!(status = %resp.status(), "copilot token exchange failed");
            return Ok(None);
        }

        let data: CopilotTokenResponse =
            resp.json().await.context("parsing copilot token response")?;
        Ok(Some(AccessInfo {
            refresh: refresh.to_string(),
            access: data.token,
            // Server reports seconds; the credential file stores milliseconds.
            expires: data.expires_at * 1000,
        }))
    }
}

/// High-level token management on top of [`DeviceFlow`] and the credential
/// store.  Owns the cached-vs-refresh decision.
pub struct CopilotTokenManager {
    store: Arc<CredentialStore>,
    flow: DeviceFlow,
}

impl CopilotTokenManager {
    pub const PROVIDER_ID: &'static str = "github-copilot";

    pub fn new(store: Arc<CredentialStore>) -> Self {
        Self {
            store,
            flow: DeviceFlow::new(),
        }
    }

    pub fn with_flow(store: Arc<CredentialStore>, flow: DeviceFlow) -> Self {
        Self { store, flow }
    }

    pub fn flow(&self) -> &DeviceFlow {
        &self.flow
    }

    /// Poll once for the device-flow result and persist the refresh token on
    /// success.  Returns the poll outcome so callers can keep waiting on
    /// `Pending`.
    pub async fn complete_device_flow(&self, device_code: &str) -> anyhow::Result<PollOutcome> {
        let outcome = self.flow.poll(device_code).await?;
        if let PollOutcome::Success { refresh } = &outcome {
            self.store
                .set(
                    Self::PROVIDER_ID,
                    Credential::Oauth {
                        refresh: refresh.clone(),
                        access: String::new(),
                        expires: 0,
                    },
                )
                .await?;
        }
        Ok(outcome)
    }

    /// Return a valid Copilot access token.
    ///
    /// When the stored token is non-empty and unexpired (and `force` is not
    /// set) no HTTP request is made.  Otherwise exactly one refresh attempt
    /// runs; on success the new token replaces the stored value.  A failed
    /// refresh returns `None` and leaves the stored refresh token intact.
    pub async fn get_access_token(&self, force: bool) -> Option<String> {
        let cred = self.store.get(Self::PROVIDER_ID).await?;
        let (refresh, access, expires) = match cred {
            Credential::Oauth { refresh, access, expires } => (refresh, access, expires),
            Credential::Api { .. } => {
                warn!("github-copilot credential is not oauth");
                return None;
            }
        };

        let now_ms = chrono::Utc::now().timestamp_millis();
        if !force && !access.is_empty() && expires > now_ms {
            debug!(expires_in_s = (expires - now_ms) / 1000, "using cached copilot token");
            return Some(access);
        }

        let minted = match self.flow.access(&refresh).await {
            Ok(Some(info)) => info,
            Ok(None) => return None,
            Err(e) => {
                warn!(error = %e, "copilot token refresh failed");
                return None;
            }
        };

        if let Err(e) = self
            .store
            .set(
                Self::PROVIDER_ID,
                Credential::Oauth {
                    refresh: minted.refresh.clone(),
                    access: minted.access.clone(),
                    expires: minted.expires,
                },
            )
            .await
        {
            // Token is still usable this turn even if persistence failed.
            warn!(error = %e, "failed to persist refreshed copilot token");
        }
        Some(minted.access)
    }

    pub async fn is_authenticated(&self) -> bool {
        self.get_access_token(false).await.is_some()
    }

    /// Remove the stored credential (logout).
    pub async fn revoke(&self) -> anyhow::Result<()> {
        self.store.remove(Self::PROVIDER_ID).await
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
