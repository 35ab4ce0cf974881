// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

/// Lifecycle of a tool invocation recorded in a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStatus {
    Pending,
    Running,
    Completed,
    Error,
}

/// Execution state attached to a [`Part::Tool`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolState {
    pub status: ToolStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub output: Option<String>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl ToolState {
    pub fn pending() -> Self {
        Self {
            status: ToolStatus::Pending,
            title: None,
            output: None,
            metadata: serde_json::Map::new(),
        }
    }
}

/// One content part of a message.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum Part {
    Text {
        text: String,
        timestamp: DateTime<Utc>,
    },
    Tool {
        tool: String,
        args: serde_json::Map<String, serde_json::Value>,
        state: ToolState,
        timestamp: DateTime<Utc>,
    },
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text {
            text: text.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn tool(
        tool: impl Into<String>,
        args: serde_json::Map<String, serde_json::Value>,
        state: ToolState,
    ) -> Self {
        Self::Tool {
            tool: tool.into(),
            args,
            state,
            timestamp: Utc::now(),
        }
    }
}

/// A persisted conversation message.  Messages are append-only; ordering
/// within a session is by `timestamp` ascending.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub session_id: String,
    pub role: Role,
    #[serde(default)]
    pub parts: Vec<Part>,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "serde_json::Map::is_empty")]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl Message {
    pub fn new(session_id: impl Into<String>, role: Role) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            session_id: session_id.into(),
            role,
            parts: Vec::new(),
            timestamp: Utc::now(),
            metadata: serde_json::Map::new(),
        }
    }

    pub fn user(session_id: impl Into<String>, text: impl Into<String>) -> Self {
        let mut m = Self::new(session_id, Role::User);
        m.parts.push(Part::text(text));
        m
    }

    pub fn assistant(session_id: impl Into<String>) -> Self {
        Self::new(session_id, Role::Assistant)
    }

    pub fn push_text(&mut self, text: impl Into<String>) {
        self.parts.push(Part::text(text));
    }

    pub fn push_tool(
        &mut self,
        tool: impl Into<String>,
        args: serde_json::Map<String, serde_json::Value>,
        state: ToolState,
    ) {
        self.parts.push(Part::tool(tool, args, state));
    }

    /// Concatenated text of all text parts.
    pub fn text_content(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| match p {
                Part::Text { text, .. } => Some(text.as_str()),
                Part::Tool { .. } => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
