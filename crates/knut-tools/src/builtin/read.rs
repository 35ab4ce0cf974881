// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolContext, ToolResult};

const MAX_READ_SIZE: u64 = 250 * 1024;
const DEFAULT_LINE_LIMIT: usize = 2000;
const MAX_LINE_WIDTH: usize = 2000;

pub struct ReadTool;

#[async_trait]
impl Tool for ReadTool {
    fn id(&self) -> &str {
        "read"
    }

    fn description(&self) -> &str {
        "Read the contents of a file"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The path to the file to read"
                },
                "offset": {
                    "type": "integer",
                    "minimum": 0,
                    "description": "The line number to start reading from (0-based)"
                },
                "limit": {
                    "type": "integer",
                    "minimum": 1,
                    "description": "The number of lines to read (defaults to 2000)"
                }
            },
            "required": ["file_path"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let Some(raw_path) = args.get("file_path").and_then(|v| v.as_str()) else {
            return Ok(ToolResult::error("read", "missing required parameter 'file_path'"));
        };
        let offset = args.get("offset").and_then(|v| v.as_u64()).unwrap_or(0) as usize;
        let limit = args
            .get("limit")
            .and_then(|v| v.as_u64())
            .unwrap_or(DEFAULT_LINE_LIMIT as u64) as usize;

        let path = match ctx.resolve_path(raw_path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::error("read", e.to_string())),
        };

        debug!(path = %path.display(), offset, limit, "read tool");

        if !path.exists() {
            let mut msg = format!("File not found: {}", path.display());
            let suggestions = similar_entries(&path);
            if !suggestions.is_empty() {
                msg.push_str("\n\nDid you mean one of these?\n");
                msg.push_str(&suggestions.join("\n"));
            }
            return Ok(ToolResult::error("read", msg));
        }

        let size = tokio::fs::metadata(&path).await.map(|m| m.len()).unwrap_or(0);
        if size > MAX_READ_SIZE {
            return Ok(ToolResult::error(
                "read",
                format!("File is too large ({size} bytes). Maximum size is {MAX_READ_SIZE} bytes"),
            ));
        }

        if let Some(kind) = image_type(&path) {
            return Ok(ToolResult::error(
                "read",
                format!("This is an image file of type: {kind}\nUse a different tool to process images"),
            ));
        }

        let bytes = match tokio::fs::read(&path).await {
            Ok(b) => b,
            Err(e) => return Ok(ToolResult::error("read", format!("read error: {e}"))),
        };
        let content = String::from_utf8_lossy(&bytes);
        let lines: Vec<&str> = content.split('\n').collect();

        let selected: Vec<String> = lines
            .iter()
            .skip(offset)
            .take(limit)
            .enumerate()
            .map(|(i, line)| {
                let clipped = clip_line(line);
                format!("{:5}| {}", offset + i + 1, clipped)
            })
            .collect();

        let shown = selected.len();
        let mut output = format!("<file>\n{}", selected.join("\n"));
        if lines.len() > offset + shown {
            output.push_str(&format!(
                "\n\n(File has more lines. Use 'offset' parameter to read beyond line {})",
                offset + shown
            ));
        }
        output.push_str("\n</file>");

        let preview: String = selected.iter().take(20).cloned().collect::<Vec<_>>().join("\n");
        let title = ctx.display_path(&path);

        Ok(ToolResult::new(title, output).with_metadata("preview", json!(preview)))
    }
}

/// Up to 3 entries of the parent directory whose names overlap the requested
/// one, for "did you mean" suggestions.
fn similar_entries(path: &std::path::Path) -> Vec<String> {
    let (Some(dir), Some(base)) = (path.parent(), path.file_name().and_then(|n| n.to_str()))
    else {
        return Vec::new();
    };
    let base_lower = base.to_lowercase();
    let Ok(entries) = std::fs::read_dir(dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter_map(|e| e.file_name().to_str().map(str::to_string))
        .filter(|name| {
            let lower = name.to_lowercase();
            lower.contains(&base_lower) || base_lower.contains(&lower)
        })
        .take(3)
        .map(|name| dir.join(name).display().to_string())
        .collect()
}

fn clip_line(line: &str) -> String {
    if line.chars().count() <= MAX_LINE_WIDTH {
        return line.to_string();
    }
    let clipped: String = line.chars().take(MAX_LINE_WIDTH).collect();
    format!("{clipped}...")
}

fn image_type(path: &std::path::Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_lowercase();
    match ext.as_str() {
        "jpg" | "jpeg" => Some("JPEG"),
        "png" => Some("PNG"),
        "gif" => Some("GIF"),
        "bmp" => Some("BMP"),
        "svg" => Some("SVG"),
        "webp" => Some("WebP"),
        _ => None,
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(root: &std::path::Path) -> ToolContext {
        ToolContext::new("s1", "m1", root)
    }

    async fn read(args: Value, root: &std::path::Path) -> ToolResult {
        ReadTool.execute(args, &ctx(root)).await.unwrap()
    }

    #[tokio::test]
    async fn reads_file_with_line_numbers() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("a.txt"), "alpha\nbeta\ngamma").unwrap();
        let out = read(json!({"file_path": "a.txt"}), dir.path()).await;
        assert!(!out.is_error());
        assert!(out.output.starts_with("<file>"));
        assert!(out.output.trim_end().ends_with("</file>"));
        assert!(out.output.contains("    1| alpha"));
        assert!(out.output.contains("    3| gamma"));
    }

    #[tokio::test]
    async fn offset_and_limit_select_window() {
        let dir = tempfile::tempdir().unwrap();
        let content: String = (1..=10).map(|i| format!("line{i}\n")).collect();
        std::fs::write(dir.path().join("n.txt"), content).unwrap();
        let out = read(json!({"file_path": "n.txt", "offset": 2, "limit": 3}), dir.path()).await;
        // offset=2, limit=3 → lines 3..5, numbered 1-based from the file start
        assert!(out.output.contains("    3| line3"));
        assert!(out.output.contains("    5| line5"));
        assert!(!out.output.contains("line6\n"));
        assert!(out.output.contains("read beyond line 5"));
    }

    #[tokio::test]
    async fn long_lines_clipped_with_ellipsis() {
        let dir = tempfile::tempdir().unwrap();
        let long = "y".repeat(MAX_LINE_WIDTH + 50);
        std::fs::write(dir.path().join("wide.txt"), &long).unwrap();
        let out = read(json!({"file_path": "wide.txt"}), dir.path()).await;
        assert!(out.output.contains("..."));
        assert!(!out.output.contains(&long));
    }

    #[tokio::test]
    async fn missing_file_suggests_similar_names() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.yaml"), "x").unwrap();
        let out = read(json!({"file_path": "config.yml"}), dir.path()).await;
        assert!(out.is_error());
        assert!(out.output.contains("File not found"));
        // "config.yml" and "config.yaml" overlap neither way as substrings,
        // but "config" files sharing a prefix are caught by the containment
        // check only when one name contains the other.  Use the stem case.
        let out2 = read(json!({"file_path": "config"}), dir.path()).await;
        assert!(out2.output.contains("Did you mean"));
        assert!(out2.output.contains("config.yaml"));
    }

    #[tokio::test]
    async fn oversized_file_is_refused_without_reading() {
        let dir = tempfile::tempdir().unwrap();
        let big = vec![b'a'; (MAX_READ_SIZE + 1) as usize];
        std::fs::write(dir.path().join("big.txt"), big).unwrap();
        let out = read(json!({"file_path": "big.txt"}), dir.path()).await;
        assert!(out.is_error());
        assert!(out.output.contains("too large"));
    }

    #[tokio::test]
    async fn image_extension_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pic.png"), "fake").unwrap();
        let out = read(json!({"file_path": "pic.png"}), dir.path()).await;
        assert!(out.is_error());
        assert!(out.output.contains("image file"));
        assert!(out.output.contains("PNG"));
    }

    #[tokio::test]
    async fn escaping_relative_path_is_refused() {
        let dir = tempfile::tempdir().unwrap();
        let out = read(json!({"file_path": "../../etc/passwd"}), dir.path()).await;
        assert!(out.is_error());
        assert!(out.output.contains("escapes workspace root"));
    }

    #[tokio::test]
    async fn title_is_workspace_relative() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "pub fn x() {}").unwrap();
        let out = read(json!({"file_path": "src/lib.rs"}), dir.path()).await;
        assert_eq!(out.title, "src/lib.rs");
    }

    #[test]
    fn clip_line_keeps_short_lines() {
        assert_eq!(clip_line("short"), "short");
    }
}
