// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolContext, ToolResult};

pub struct WriteTool;

#[async_trait]
impl Tool for WriteTool {
    fn id(&self) -> &str {
        "write"
    }

    fn description(&self) -> &str {
        "Write content to a file"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to write"
                },
                "content": {
                    "type": "string",
                    "description": "The content to write to the file"
                },
                "create_dirs": {
                    "type": "boolean",
                    "description": "Create parent directories if they don't exist (default true)"
                }
            },
            "required": ["file_path", "content"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let Some(raw_path) = args.get("file_path").and_then(|v| v.as_str()) else {
            return Ok(ToolResult::error("write", "missing required parameter 'file_path'"));
        };
        let Some(content) = args.get("content").and_then(|v| v.as_str()) else {
            return Ok(ToolResult::error("write", "missing required parameter 'content'"));
        };
        let create_dirs = args
            .get("create_dirs")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let path = match ctx.resolve_path(raw_path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::error("write", e.to_string())),
        };

        debug!(path = %path.display(), bytes = content.len(), "write tool");

        if create_dirs {
            if let Some(parent) = path.parent() {
                if let Err(e) = tokio::fs::create_dir_all(parent).await {
                    return Ok(ToolResult::error(
                        "write",
                        format!("Failed to create parent directories: {e}"),
                    ));
                }
            }
        }

        let existed = path.exists();
        if let Err(e) = tokio::fs::write(&path, content).await {
            return Ok(ToolResult::error(
                format!("Error writing {raw_path}"),
                format!("Failed to write file: {e}"),
            ));
        }

        let size = content.len();
        let line_count =
            content.matches('\n').count() + usize::from(!content.is_empty() && !content.ends_with('\n'));
        let action = if existed { "Updated" } else { "Created" };
        let rel = ctx.display_path(&path);

        Ok(ToolResult::new(
            format!("{action} {rel}"),
            format!("{action} file: {rel}\nSize: {size} bytes\nLines: {line_count}"),
        )
        .with_metadata("file_path", json!(path.display().to_string()))
        .with_metadata("file_size", json!(size))
        .with_metadata("line_count", json!(line_count))
        .with_metadata("action", json!(action.to_lowercase())))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(root: &std::path::Path) -> ToolContext {
        ToolContext::new("s1", "m1", root)
    }

    #[tokio::test]
    async fn creates_new_file() {
        let dir = tempfile::tempdir().unwrap();
        let out = WriteTool
            .execute(
                json!({"file_path": "new.txt", "content": "hello\nworld\n"}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert!(!out.is_error());
        assert_eq!(out.metadata["action"], "created");
        assert_eq!(out.metadata["line_count"], 2);
        assert_eq!(
            std::fs::read_to_string(dir.path().join("new.txt")).unwrap(),
            "hello\nworld\n"
        );
    }

    #[tokio::test]
    async fn overwrite_reports_updated() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "old").unwrap();
        let out = WriteTool
            .execute(
                json!({"file_path": "f.txt", "content": "new"}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(out.metadata["action"], "updated");
        assert_eq!(std::fs::read_to_string(dir.path().join("f.txt")).unwrap(), "new");
    }

    #[tokio::test]
    async fn creates_parent_directories() {
        let dir = tempfile::tempdir().unwrap();
        let out = WriteTool
            .execute(
                json!({"file_path": "a/b/c.txt", "content": "x"}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert!(!out.is_error());
        assert!(dir.path().join("a/b/c.txt").exists());
    }

    #[tokio::test]
    async fn reports_size_and_line_count_without_trailing_newline() {
        let dir = tempfile::tempdir().unwrap();
        let out = WriteTool
            .execute(
                json!({"file_path": "f.txt", "content": "a\nb\nc"}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(out.metadata["line_count"], 3);
        assert_eq!(out.metadata["file_size"], 5);
    }

    #[tokio::test]
    async fn missing_content_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = WriteTool
            .execute(json!({"file_path": "f.txt"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(out.is_error());
    }

    #[tokio::test]
    async fn escaping_path_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let out = WriteTool
            .execute(
                json!({"file_path": "../outside.txt", "content": "x"}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert!(out.is_error());
        assert!(out.output.contains("escapes workspace root"));
    }
}
