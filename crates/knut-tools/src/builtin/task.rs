// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};

use crate::tool::{Tool, ToolContext, ToolResult};

/// Sub-agent delegation stub.  Spawning a nested agent session needs
/// infrastructure that does not exist yet; the tool describes what would
/// happen so the model is not left guessing.
pub struct TaskTool;

#[async_trait]
impl Tool for TaskTool {
    fn id(&self) -> &str {
        "task"
    }

    fn description(&self) -> &str {
        "Launch a new agent that has access to specific tools for completing focused tasks"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "instruction": {
                    "type": "string",
                    "description": "The instruction or task for the sub-agent to complete"
                }
            },
            "required": ["instruction"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let instruction = args
            .get("instruction")
            .and_then(|v| v.as_str())
            .unwrap_or("");

        Ok(ToolResult::new(
            "Task Agent",
            format!(
                "Task agent would be launched with instruction: {instruction}\n\n\
                 [Note: sub-agent spawning is not implemented; run the steps directly instead.]"
            ),
        )
        .with_metadata("instruction", json!(instruction))
        .with_metadata("session_id", json!(ctx.session_id)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
