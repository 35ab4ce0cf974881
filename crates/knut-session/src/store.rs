// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! On-disk session persistence.
//!
//! Layout under the store root:
//! ```text
//! <root>/<session-id>/info.json
//! <root>/<session-id>/messages/<message-id>.json
//! ```
//!
//! Every JSON write goes through temp-file + rename, so a crash leaves each
//! file either absent or fully valid.  A partially written message file is
//! skipped by `get_messages` on the next read; no repair pass exists.

use std::path::{Path, PathBuf};

use anyhow::Context;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::message::{Message, Role};

/// Maximum title length derived from the first user message.
const TITLE_MAX_CHARS: usize = 50;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionInfo {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default)]
    pub message_count: usize,
    #[serde(default = "default_mode")]
    pub mode: String,
}

fn default_mode() -> String {
    "default".into()
}

/// Filesystem-backed session store.  Exclusively owns the files under its
/// root; concurrent turns on the same session are the caller's problem.
pub struct SessionStore {
    root: PathBuf,
}

impl SessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn session_dir(&self, id: &str) -> PathBuf {
        self.root.join(id)
    }

    fn info_file(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("info.json")
    }

    fn messages_dir(&self, id: &str) -> PathBuf {
        self.session_dir(id).join("messages")
    }

    /// Create a new session with a fresh uuid-v4 id.
    pub async fn create(&self, mode: &str) -> anyhow::Result<SessionInfo> {
        let now = Utc::now();
        let info = SessionInfo {
            id: Uuid::new_v4().to_string(),
            title: None,
            created: now,
            updated: now,
            message_count: 0,
            mode: mode.to_string(),
        };
        tokio::fs::create_dir_all(self.messages_dir(&info.id))
            .await
            .with_context(|| format!("creating session dir for {}", info.id))?;
        write_json_atomic(&self.info_file(&info.id), &info).await?;
        info!(session = %info.id, mode, "created session");
        Ok(info)
    }

    /// Load session metadata.  Missing or unparseable info files yield `None`.
    pub async fn get(&self, id: &str) -> Option<SessionInfo> {
        let bytes = tokio::fs::read(self.info_file(id)).await.ok()?;
        match serde_json::from_slice(&bytes) {
            Ok(info) => Some(info),
            Err(e) => {
                warn!(session = id, error = %e, "unparseable session info");
                None
            }
        }
    }

    /// All sessions ordered by directory mtime, newest first.
    pub async fn list(&self) -> Vec<SessionInfo> {
        let mut dirs: Vec<(std::time::SystemTime, PathBuf)> = Vec::new();
        let mut rd = match tokio::fs::read_dir(&self.root).await {
            Ok(rd) => rd,
            Err(_) => return Vec::new(),
        };
        while let Ok(Some(entry)) = rd.next_entry().await {
            let path = entry.path();
            if !path.is_dir() {
                continue;
            }
            let mtime = entry
                .metadata()
                .await
                .and_then(|m| m.modified())
                .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
            dirs.push((mtime, path));
        }
        dirs.sort_by(|a, b| b.0.cmp(&a.0));

        let mut sessions = Vec::with_capacity(dirs.len());
        for (_, dir) in dirs {
            let Some(name) = dir.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some(info) = self.get(name).await {
                sessions.push(info);
            }
        }
        sessions
    }

    /// Remove a session and all its messages.  Idempotent.
    pub async fn delete(&self, id: &str) -> anyhow::Result<()> {
        match tokio::fs::remove_dir_all(self.session_dir(id)).await {
            Ok(()) => {
                info!(session = id, "deleted session");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e).with_context(|| format!("deleting session {id}")),
        }
    }

    /// Append a message, then recompute `info.json` (message count, updated
    /// timestamp, and the title when still unset).
    pub async fn add_message(&self, id: &str, msg: &Message) -> anyhow::Result<()> {
        let dir = self.messages_dir(id);
        if !self.session_dir(id).exists() {
            anyhow::bail!("session {id} not found");
        }
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("creating messages dir for {id}"))?;
        write_json_atomic(&dir.join(format!("{}.json", msg.id)), msg).await?;
        self.refresh_info(id).await
    }

    /// All messages of a session ordered by timestamp ascending.  Files that
    /// fail to parse (e.g. a write interrupted by a crash) are skipped.
    pub async fn get_messages(&self, id: &str) -> Vec<Message> {
        let dir = self.messages_dir(id);
        let mut rd = match tokio::fs::read_dir(&dir).await {
            Ok(rd) => rd,
            Err(_) => return Vec::new(),
        };
        let mut messages = Vec::new();
        while let Ok(Some(entry)) = rd.next_entry().await {
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            let Ok(bytes) = tokio::fs::read(&path).await else {
                continue;
            };
            match serde_json::from_slice::<Message>(&bytes) {
                Ok(m) => messages.push(m),
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "skipping unparseable message");
                }
            }
        }
        messages.sort_by_key(|m| m.timestamp);
        messages
    }

    /// Interface stub for session sharing; no upload service is wired in.
    pub async fn share(&self, id: &str) -> String {
        let tail: String = id.chars().rev().take(8).collect::<Vec<_>>().into_iter().rev().collect();
        format!("https://knut.dev/s/{tail}")
    }

    async fn refresh_info(&self, id: &str) -> anyhow::Result<()> {
        let Some(mut info) = self.get(id).await else {
            anyhow::bail!("session {id} has no info.json");
        };
        let messages = self.get_messages(id).await;
        info.message_count = messages.len();
        info.updated = Utc::now();

        if info.title.is_none() {
            if let Some(first_user) = messages.iter().find(|m| m.role == Role::User) {
                let text = first_user.text_content();
                let trimmed = text.trim();
                if !trimmed.is_empty() {
                    info.title = Some(derive_title(trimmed));
                }
            }
        }

        write_json_atomic(&self.info_file(id), &info).await
    }
}

/// First [`TITLE_MAX_CHARS`] characters of the first user message, with an
/// ellipsis when truncated.
fn derive_title(text: &str) -> String {
    let mut title: String = text.chars().take(TITLE_MAX_CHARS).collect();
    if text.chars().count() > TITLE_MAX_CHARS {
        title = title.trim_end().to_string();
        title.push_str("...");
    }
    title
}

/// Serialize `value` as pretty JSON and move it into place atomically.
async fn write_json_atomic<T: Serialize>(path: &Path, value: &T) -> anyhow::Result<()> {
    let json = serde_json::to_vec_pretty(value)?;
    let tmp = path.with_extension("json.tmp");
    tokio::fs::write(&tmp, &json)
        .await
        .with_context(|| format!("writing {}", tmp.display()))?;
    tokio::fs::rename(&tmp, path)
        .await
        .with_context(|| format!("renaming into {}", path.display()))?;
    Ok(())
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
