// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::builtin::edit::{replace_text, unified_diff};
use crate::tool::{Tool, ToolContext, ToolResult};

/// Apply a sequence of edit operations to one file.  Edits run in order and
/// each sees the output of the previous one; on failure the edits already
/// applied stay in place and the partial progress is reported in metadata.
pub struct MultiEditTool;

#[async_trait]
impl Tool for MultiEditTool {
    fn id(&self) -> &str {
        "multiedit"
    }

    fn description(&self) -> &str {
        "Perform multiple edit operations sequentially on a single file"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The absolute path to the file to modify"
                },
                "edits": {
                    "type": "array",
                    "description": "Array of edit operations to perform sequentially on the file",
                    "items": {
                        "type": "object",
                        "properties": {
                            "old_string": { "type": "string" },
                            "new_string": { "type": "string" },
                            "replace_all": { "type": "boolean" }
                        },
                        "required": ["old_string", "new_string"]
                    }
                }
            },
            "required": ["file_path", "edits"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let Some(raw_path) = args.get("file_path").and_then(|v| v.as_str()) else {
            return Ok(ToolResult::error("multiedit", "missing required parameter 'file_path'"));
        };
        let Some(edits) = args.get("edits").and_then(|v| v.as_array()) else {
            return Ok(ToolResult::error("multiedit", "missing required parameter 'edits'"));
        };
        if edits.is_empty() {
            return Ok(ToolResult::error("multiedit", "'edits' must not be empty"));
        }

        let path = match ctx.resolve_path(raw_path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::error("multiedit", e.to_string())),
        };
        let rel = ctx.display_path(&path);
        if !path.exists() {
            return Ok(ToolResult::error(
                "multiedit",
                format!("File {} not found", path.display()),
            ));
        }

        debug!(path = %path.display(), edits = edits.len(), "multiedit tool");

        let original = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolResult::error("multiedit", format!("read error: {e}"))),
        };

        let mut current = original.clone();
        let mut applied = 0usize;
        let mut failure: Option<String> = None;

        for (i, edit) in edits.iter().enumerate() {
            let old = edit.get("old_string").and_then(|v| v.as_str()).unwrap_or("");
            let new = edit.get("new_string").and_then(|v| v.as_str()).unwrap_or("");
            let replace_all = edit
                .get("replace_all")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);

            match replace_text(&current, old, new, replace_all) {
                Ok(next) => {
                    current = next;
                    applied += 1;
                }
                Err(e) => {
                    failure = Some(format!("edit {} failed: {e}", i + 1));
                    break;
                }
            }
        }

        if applied > 0 {
            if let Err(e) = tokio::fs::write(&path, &current).await {
                return Ok(ToolResult::error("multiedit", format!("write error: {e}")));
            }
        }

        let diff = unified_diff(&rel, &original, &current);
        let mut result = match &failure {
            None => ToolResult::new(
                &rel,
                format!("Applied {applied} edits to {rel}\n\n{diff}"),
            ),
            Some(msg) => ToolResult::error(
                &rel,
                format!("{msg}; applied {applied} of {} edits to {rel}\n\n{diff}", edits.len()),
            ),
        };
        result = result
            .with_metadata("applied", json!(applied))
            .with_metadata("total", json!(edits.len()))
            .with_metadata("diff", json!(diff));
        Ok(result)
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
