// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::process::Command;
use tracing::debug;

use crate::tool::{Tool, ToolContext, ToolResult};

/// Per-stream byte ceiling on captured stdout/stderr.
const MAX_OUTPUT_BYTES: usize = 30_000;
const DEFAULT_TIMEOUT_SECS: u64 = 60;
const MAX_TIMEOUT_SECS: u64 = 600;

/// Built-in tool that runs a shell command in the workspace root.
pub struct BashTool {
    pub default_timeout_secs: u64,
}

impl Default for BashTool {
    fn default() -> Self {
        Self {
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

#[async_trait]
impl Tool for BashTool {
    fn id(&self) -> &str {
        "bash"
    }

    fn description(&self) -> &str {
        "Execute bash commands in the terminal"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The command to execute"
                },
                "timeout": {
                    "type": "integer",
                    "description": "Optional timeout in seconds (default 60, max 600)"
                },
                "description": {
                    "type": "string",
                    "description": "Clear, concise description of what this command does in 5-10 words. \
                                    Examples:\nInput: ls\nOutput: Lists files in current directory\n\n\
                                    Input: git status\nOutput: Shows working tree status"
                }
            },
            "required": ["command", "description"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let Some(command) = args.get("command").and_then(|v| v.as_str()) else {
            return Ok(ToolResult::error("bash", "missing required parameter 'command'"));
        };
        let description = args
            .get("description")
            .and_then(|v| v.as_str())
            .unwrap_or("")
            .to_string();
        let timeout = args
            .get("timeout")
            .and_then(|v| v.as_u64())
            .unwrap_or(self.default_timeout_secs)
            .min(MAX_TIMEOUT_SECS);

        debug!(cmd = %command, timeout, "bash tool");

        let mut cmd = Command::new("bash");
        cmd.arg("-c")
            .arg(command)
            .current_dir(&ctx.workspace_root)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        // When the output future is dropped (timeout or cancellation below),
        // the child must not linger.
        cmd.kill_on_drop(true);

        let output = tokio::select! {
            _ = ctx.cancel.cancelled() => {
                return Ok(ToolResult::error(
                    format!("Error: {command}"),
                    "command cancelled",
                ));
            }
            _ = tokio::time::sleep(Duration::from_secs(timeout)) => {
                return Ok(ToolResult::error(
                    format!("Error: {command}"),
                    format!("Command timed out after {timeout} seconds"),
                ));
            }
            result = cmd.output() => match result {
                Ok(o) => o,
                Err(e) => {
                    return Ok(ToolResult::error(
                        format!("Error: {command}"),
                        format!("Failed to execute command: {e}"),
                    ));
                }
            },
        };

        let stdout = truncate_stream(&String::from_utf8_lossy(&output.stdout));
        let stderr = truncate_stream(&String::from_utf8_lossy(&output.stderr));
        let exit_code = output.status.code().unwrap_or(-1);

        let rendered = format!("<stdout>\n{stdout}\n</stdout>\n<stderr>\n{stderr}\n</stderr>");

        Ok(ToolResult::new(command, rendered)
            .with_metadata("stdout", json!(stdout))
            .with_metadata("stderr", json!(stderr))
            .with_metadata("exit_code", json!(exit_code))
            .with_metadata("description", json!(description)))
    }
}

/// Cap one output stream at [`MAX_OUTPUT_BYTES`] with an explicit marker.
fn truncate_stream(s: &str) -> String {
    if s.len() <= MAX_OUTPUT_BYTES {
        return s.to_string();
    }
    let mut end = MAX_OUTPUT_BYTES;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}\n... (output truncated)", &s[..end])
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
