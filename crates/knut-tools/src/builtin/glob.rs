// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{Tool, ToolContext, ToolResult};

const RESULT_LIMIT: usize = 100;

/// Glob-pattern file enumeration, newest first.
pub struct GlobTool;

#[async_trait]
impl Tool for GlobTool {
    fn id(&self) -> &str {
        "glob"
    }

    fn description(&self) -> &str {
        "Find files using glob patterns. Results are sorted by modification time, \
         newest first, capped at 100."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "The glob pattern to match files against"
                },
                "path": {
                    "type": "string",
                    "description": "The directory to search in. If not specified, the current working directory will be used. IMPORTANT: Omit this field to use the default directory. DO NOT enter 'undefined' or 'null' - simply omit it for the default behavior. Must be a valid directory path if provided."
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let Some(pattern) = args.get("pattern").and_then(|v| v.as_str()) else {
            return Ok(ToolResult::error("glob", "missing required parameter 'pattern'"));
        };
        let root = match args.get("path").and_then(|v| v.as_str()) {
            Some(p) => match ctx.resolve_path(p) {
                Ok(p) => p,
                Err(e) => return Ok(ToolResult::error("glob", e.to_string())),
            },
            None => ctx.workspace_root.clone(),
        };
        if !root.is_dir() {
            return Ok(ToolResult::error(
                "glob",
                format!("Directory not found: {}", root.display()),
            ));
        }

        debug!(pattern, root = %root.display(), "glob tool");

        // A pattern containing '/' matches against the workspace-relative
        // path (`**` spans directories); otherwise only the file name matters.
        let path_mode = pattern.contains('/');
        let re = match path_glob_to_regex(pattern) {
            Ok(re) => re,
            Err(e) => return Ok(ToolResult::error("glob", format!("Invalid pattern: {e}"))),
        };

        let mut hits: Vec<(std::time::SystemTime, std::path::PathBuf)> = Vec::new();
        for entry in WalkDir::new(&root).into_iter().filter_map(|e| e.ok()) {
            if !entry.file_type().is_file() {
                continue;
            }
            let matched = if path_mode {
                let rel = entry
                    .path()
                    .strip_prefix(&root)
                    .unwrap_or(entry.path())
                    .to_string_lossy()
                    .to_string();
                re.is_match(&rel)
            } else {
                re.is_match(&entry.file_name().to_string_lossy())
            };
            if matched {
                let mtime = entry
                    .metadata()
                    .ok()
                    .and_then(|m| m.modified().ok())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                hits.push((mtime, entry.path().to_path_buf()));
            }
        }

        hits.sort_by(|a, b| b.0.cmp(&a.0));
        let truncated = hits.len() > RESULT_LIMIT;
        hits.truncate(RESULT_LIMIT);

        let mut lines: Vec<String> = hits
            .iter()
            .map(|(_, p)| ctx.display_path(p))
            .collect();
        let count = lines.len();
        if lines.is_empty() {
            lines.push("No files found".into());
        } else if truncated {
            lines.push(String::new());
            lines.push("(Results are truncated. Consider using a more specific path or pattern.)".into());
        }

        Ok(ToolResult::new(ctx.display_path(&root), lines.join("\n"))
            .with_metadata("count", json!(count))
            .with_metadata("truncated", json!(truncated)))
    }
}

/// Translate a path glob into an anchored regex.
///
/// `**/` matches zero or more leading directories, `**` any path segment
/// sequence, `*`/`?` stay within one segment.
fn path_glob_to_regex(pattern: &str) -> Result<regex::Regex, regex::Error> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    let mut rest = pattern;
    while !rest.is_empty() {
        if let Some(tail) = rest.strip_prefix("**/") {
            source.push_str("(?:.*/)?");
            rest = tail;
        } else if let Some(tail) = rest.strip_prefix("**") {
            source.push_str(".*");
            rest = tail;
        } else {
            let c = rest.chars().next().unwrap();
            match c {
                '*' => source.push_str("[^/]*"),
                '?' => source.push_str("[^/]"),
                c if "\\.+()|[]{}^$".contains(c) => {
                    source.push('\\');
                    source.push(c);
                }
                c => source.push(c),
            }
            rest = &rest[c.len_utf8()..];
        }
    }
    source.push('$');
    regex::Regex::new(&source)
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(root: &std::path::Path) -> ToolContext {
        ToolContext::new("s1", "m1", root)
    }

    fn setup() -> tempfile::TempDir {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("main.rs"), "x").unwrap();
        std::fs::write(dir.path().join("lib.rs"), "x").unwrap();
        std::fs::write(dir.path().join("notes.md"), "x").unwrap();
        std::fs::create_dir(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/deep.rs"), "x").unwrap();
        dir
    }

    #[tokio::test]
    async fn name_pattern_matches_at_any_depth() {
        let dir = setup();
        let out = GlobTool
            .execute(json!({"pattern": "*.rs"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(!out.is_error());
        assert_eq!(out.metadata["count"], 3);
        assert!(out.output.contains("src/deep.rs"));
        assert!(!out.output.contains("notes.md"));
    }

    #[tokio::test]
    async fn no_matches_reports_cleanly() {
        let dir = setup();
        let out = GlobTool
            .execute(json!({"pattern": "*.zig"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(out.output.contains("No files found"));
        assert_eq!(out.metadata["count"], 0);
    }

    #[tokio::test]
    async fn newest_file_sorts_first() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("old.rs"), "x").unwrap();
        // Push the second file's mtime into the future to avoid flaky
        // same-second timestamps.
        std::fs::write(dir.path().join("new.rs"), "x").unwrap();
        let future = std::time::SystemTime::now() + std::time::Duration::from_secs(60);
        let f = std::fs::File::open(dir.path().join("new.rs")).unwrap();
        f.set_modified(future).unwrap();

        let out = GlobTool
            .execute(json!({"pattern": "*.rs"}), &ctx(dir.path()))
            .await
            .unwrap();
        let first = out.output.lines().next().unwrap();
        assert_eq!(first, "new.rs");
    }

    #[tokio::test]
    async fn truncation_is_flagged_at_limit() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..(RESULT_LIMIT + 10) {
            std::fs::write(dir.path().join(format!("f{i}.txt")), "x").unwrap();
        }
        let out = GlobTool
            .execute(json!({"pattern": "*.txt"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(out.metadata["truncated"], true);
        assert_eq!(out.metadata["count"], RESULT_LIMIT);
        assert!(out.output.contains("truncated"));
    }

    #[tokio::test]
    async fn path_pattern_with_double_star() {
        let dir = setup();
        let out = GlobTool
            .execute(json!({"pattern": "**/*.rs", "path": "."}), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(!out.is_error());
        assert_eq!(out.metadata["count"], 3);
        assert!(out.output.contains("src/deep.rs"));
    }

    #[test]
    fn path_glob_segments_do_not_cross_slashes() {
        let re = path_glob_to_regex("src/*.rs").unwrap();
        assert!(re.is_match("src/lib.rs"));
        assert!(!re.is_match("src/nested/lib.rs"));

        let deep = path_glob_to_regex("src/**/*.rs").unwrap();
        assert!(deep.is_match("src/a/b/c.rs"));
        assert!(deep.is_match("src/c.rs"));
        assert!(!deep.is_match("other/c.rs"));
    }

    #[tokio::test]
    async fn missing_pattern_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = GlobTool.execute(json!({}), &ctx(dir.path())).await.unwrap();
        assert!(out.is_error());
    }

    #[tokio::test]
    async fn missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = GlobTool
            .execute(
                json!({"pattern": "*.rs", "path": "no-such-dir"}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert!(out.is_error());
    }
}
