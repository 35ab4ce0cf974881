// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use similar::TextDiff;
use tracing::debug;

use crate::tool::{Tool, ToolContext, ToolResult};

pub struct EditTool;

#[async_trait]
impl Tool for EditTool {
    fn id(&self) -> &str {
        "edit"
    }

    fn description(&self) -> &str {
        "Edit a file by replacing text"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The absolute path to the file to modify"
                },
                "old_string": {
                    "type": "string",
                    "description": "The text to replace"
                },
                "new_string": {
                    "type": "string",
                    "description": "The text to replace it with (must be different from old_string)"
                },
                "replace_all": {
                    "type": "boolean",
                    "description": "Replace all occurrences of old_string (default false)"
                }
            },
            "required": ["file_path", "old_string", "new_string"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let Some(raw_path) = args.get("file_path").and_then(|v| v.as_str()) else {
            return Ok(ToolResult::error("edit", "missing required parameter 'file_path'"));
        };
        let old_string = args.get("old_string").and_then(|v| v.as_str()).unwrap_or("");
        let new_string = args.get("new_string").and_then(|v| v.as_str()).unwrap_or("");
        let replace_all = args
            .get("replace_all")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        if old_string == new_string {
            return Ok(ToolResult::error(
                "edit",
                "old_string and new_string must be different",
            ));
        }

        let path = match ctx.resolve_path(raw_path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::error("edit", e.to_string())),
        };
        let rel = ctx.display_path(&path);

        debug!(path = %path.display(), replace_all, "edit tool");

        // Empty old_string creates a new file with new_string as content.
        if old_string.is_empty() {
            if let Some(parent) = path.parent() {
                tokio::fs::create_dir_all(parent).await.ok();
            }
            if let Err(e) = tokio::fs::write(&path, new_string).await {
                return Ok(ToolResult::error("edit", format!("Failed to create file: {e}")));
            }
            return Ok(ToolResult::new(&rel, format!("Created new file: {rel}"))
                .with_metadata(
                    "diff",
                    json!(format!("Created new file with {} characters", new_string.len())),
                ));
        }

        if !path.exists() {
            return Ok(ToolResult::error("edit", format!("File {} not found", path.display())));
        }
        if path.is_dir() {
            return Ok(ToolResult::error(
                "edit",
                format!("Path is a directory, not a file: {}", path.display()),
            ));
        }

        let content_old = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolResult::error("edit", format!("read error: {e}"))),
        };

        let content_new = match replace_text(&content_old, old_string, new_string, replace_all) {
            Ok(c) => c,
            Err(e) => return Ok(ToolResult::error("edit", e)),
        };

        if let Err(e) = tokio::fs::write(&path, &content_new).await {
            return Ok(ToolResult::error("edit", format!("write error: {e}")));
        }

        let diff = unified_diff(&rel, &content_old, &content_new);
        Ok(ToolResult::new(&rel, format!("Edited file: {rel}\n\n{diff}"))
            .with_metadata("diff", json!(diff)))
    }
}

/// Replace `old` with `new` in `content`.
///
/// Four match strategies run in order — exact, line-trimmed,
/// whitespace-normalised, indentation-flexible — each producing candidate
/// substrings that literally exist in `content`.  Without `replace_all` a
/// candidate only applies when its occurrence is unique; ambiguous candidates
/// are skipped so a later strategy (or nothing) decides.
pub(crate) fn replace_text(
    content: &str,
    old: &str,
    new: &str,
    replace_all: bool,
) -> Result<String, String> {
    if old == new {
        return Err("old_string and new_string must be different".into());
    }

    let candidate_sets = [
        simple_candidates(old),
        line_trimmed_candidates(content, old),
        whitespace_normalized_candidates(content, old),
        indentation_flexible_candidates(content, old),
    ];

    for candidates in candidate_sets {
        for candidate in candidates {
            let Some(index) = content.find(&candidate) else {
                continue;
            };

            if replace_all {
                return Ok(content.replace(&candidate, new));
            }

            let last_index = content.rfind(&candidate).unwrap_or(index);
            if index != last_index {
                // Ambiguous — not safe to pick one occurrence.
                continue;
            }

            let mut out = String::with_capacity(content.len() - candidate.len() + new.len());
            out.push_str(&content[..index]);
            out.push_str(new);
            out.push_str(&content[index + candidate.len()..]);
            return Ok(out);
        }
    }

    Err("old_string not found in content or was found multiple times".into())
}

fn simple_candidates(old: &str) -> Vec<String> {
    vec![old.to_string()]
}

/// Match line windows ignoring per-line leading/trailing whitespace; yield
/// the exact file substring covering the window.
fn line_trimmed_candidates(content: &str, old: &str) -> Vec<String> {
    let content_lines: Vec<&str> = content.split('\n').collect();
    let mut search_lines: Vec<&str> = old.split('\n').collect();
    if search_lines.last() == Some(&"") {
        search_lines.pop();
    }
    if search_lines.is_empty() || content_lines.len() < search_lines.len() {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for i in 0..=(content_lines.len() - search_lines.len()) {
        let matches = search_lines
            .iter()
            .enumerate()
            .all(|(j, s)| content_lines[i + j].trim() == s.trim());
        if matches {
            let start: usize = content_lines[..i].iter().map(|l| l.len() + 1).sum();
            let len: usize = content_lines[i..i + search_lines.len()]
                .iter()
                .map(|l| l.len() + 1)
                .sum();
            // Exclude the trailing newline of the last window line.
            candidates.push(content[start..start + len - 1].to_string());
        }
    }
    candidates
}

/// Match single lines whose runs of whitespace collapse to the same string.
fn whitespace_normalized_candidates(content: &str, old: &str) -> Vec<String> {
    let normalize = |s: &str| s.split_whitespace().collect::<Vec<_>>().join(" ");
    let target = normalize(old);
    content
        .split('\n')
        .filter(|line| normalize(line) == target)
        .map(str::to_string)
        .collect()
}

/// Match line windows after stripping the common leading indent on both sides.
fn indentation_flexible_candidates(content: &str, old: &str) -> Vec<String> {
    let deindent = |text: &str| -> String {
        let lines: Vec<&str> = text.split('\n').collect();
        let min_indent = lines
            .iter()
            .filter(|l| !l.trim().is_empty())
            .map(|l| l.len() - l.trim_start().len())
            .min()
            .unwrap_or(0);
        lines
            .iter()
            .map(|l| if l.trim().is_empty() { *l } else { &l[min_indent.min(l.len())..] })
            .collect::<Vec<_>>()
            .join("\n")
    };

    let target = deindent(old);
    let content_lines: Vec<&str> = content.split('\n').collect();
    let window = old.split('\n').count();
    if content_lines.len() < window {
        return Vec::new();
    }

    let mut candidates = Vec::new();
    for i in 0..=(content_lines.len() - window) {
        let block = content_lines[i..i + window].join("\n");
        if deindent(&block) == target {
            candidates.push(block);
        }
    }
    candidates
}

/// Render a unified diff between the old and new file contents.
pub(crate) fn unified_diff(path: &str, old: &str, new: &str) -> String {
    TextDiff::from_lines(old, new)
        .unified_diff()
        .context_radius(3)
        .header(path, path)
        .to_string()
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
