// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;

use crate::tool::{Tool, ToolContext, ToolResult};

/// Apply a unified diff to a file, with reverse support.
pub struct PatchTool;

#[async_trait]
impl Tool for PatchTool {
    fn id(&self) -> &str {
        "patch"
    }

    fn description(&self) -> &str {
        "Apply unified diff patches to files"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The absolute path to the file to patch"
                },
                "patch": {
                    "type": "string",
                    "description": "The unified diff patch to apply"
                },
                "reverse": {
                    "type": "boolean",
                    "description": "Apply patch in reverse (default false)"
                }
            },
            "required": ["file_path", "patch"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let Some(raw_path) = args.get("file_path").and_then(|v| v.as_str()) else {
            return Ok(ToolResult::error("patch", "missing required parameter 'file_path'"));
        };
        let Some(patch) = args.get("patch").and_then(|v| v.as_str()) else {
            return Ok(ToolResult::error("patch", "missing required parameter 'patch'"));
        };
        let reverse = args.get("reverse").and_then(|v| v.as_bool()).unwrap_or(false);

        let path = match ctx.resolve_path(raw_path) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::error("patch", e.to_string())),
        };
        if !path.exists() {
            return Ok(ToolResult::error("patch", format!("File not found: {}", path.display())));
        }
        let rel = ctx.display_path(&path);

        debug!(path = %path.display(), reverse, "patch tool");

        let content = match tokio::fs::read_to_string(&path).await {
            Ok(c) => c,
            Err(e) => return Ok(ToolResult::error("patch", format!("read error: {e}"))),
        };

        let hunks = match parse_hunks(patch) {
            Ok(h) => h,
            Err(e) => return Ok(ToolResult::error("patch", format!("Patch failed: {e}"))),
        };

        let patched = match apply_hunks(&content, &hunks, reverse) {
            Ok(p) => p,
            Err(e) => return Ok(ToolResult::error("patch", format!("Patch failed: {e}"))),
        };

        if let Err(e) = tokio::fs::write(&path, &patched).await {
            return Ok(ToolResult::error("patch", format!("write error: {e}")));
        }

        Ok(ToolResult::new(&rel, format!("Patch applied successfully to {rel}"))
            .with_metadata("file_path", json!(path.display().to_string()))
            .with_metadata("reverse", json!(reverse))
            .with_metadata("hunks", json!(hunks.len())))
    }
}

#[derive(Debug, Clone, PartialEq)]
enum HunkLine {
    Context(String),
    Del(String),
    Add(String),
}

#[derive(Debug, Clone)]
struct Hunk {
    lines: Vec<HunkLine>,
}

impl Hunk {
    /// Lines that must exist in the file before this hunk applies.
    fn search_lines(&self, reverse: bool) -> Vec<&str> {
        self.lines
            .iter()
            .filter_map(|l| match (l, reverse) {
                (HunkLine::Context(s), _) => Some(s.as_str()),
                (HunkLine::Del(s), false) => Some(s.as_str()),
                (HunkLine::Add(s), true) => Some(s.as_str()),
                _ => None,
            })
            .collect()
    }
}

/// Parse unified diff hunks.  `---`/`+++` headers and `\ No newline` markers
/// are skipped; `@@` starts a new hunk (line numbers are not trusted).
fn parse_hunks(diff: &str) -> Result<Vec<Hunk>, String> {
    let mut hunks: Vec<Hunk> = Vec::new();
    let mut current: Option<Hunk> = None;

    for line in diff.lines() {
        if line.starts_with("--- ") || line.starts_with("+++ ") || line.starts_with("\\ ") {
            continue;
        }
        if line.starts_with("@@") {
            if let Some(h) = current.take() {
                if !h.lines.is_empty() {
                    hunks.push(h);
                }
            }
            current = Some(Hunk { lines: Vec::new() });
            continue;
        }
        if let Some(ref mut h) = current {
            if let Some(rest) = line.strip_prefix(' ') {
                h.lines.push(HunkLine::Context(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix('-') {
                h.lines.push(HunkLine::Del(rest.to_string()));
            } else if let Some(rest) = line.strip_prefix('+') {
                h.lines.push(HunkLine::Add(rest.to_string()));
            } else if line.is_empty() {
                h.lines.push(HunkLine::Context(String::new()));
            }
        }
    }
    if let Some(h) = current {
        if !h.lines.is_empty() {
            hunks.push(h);
        }
    }

    if hunks.is_empty() {
        return Err("no hunks found in diff".into());
    }
    Ok(hunks)
}

/// Apply hunks in order.  Each hunk is located by exact match of its
/// context + removed lines; the search resumes after the previous hunk so
/// identical hunks apply to successive regions.
fn apply_hunks(content: &str, hunks: &[Hunk], reverse: bool) -> Result<String, String> {
    let had_trailing_newline = content.ends_with('\n');
    let mut lines: Vec<String> = content.split('\n').map(str::to_string).collect();
    if had_trailing_newline {
        // split leaves a trailing empty element for the final newline
        lines.pop();
    }

    let mut search_from = 0usize;
    for (n, hunk) in hunks.iter().enumerate() {
        let search = hunk.search_lines(reverse);
        let pos = find_window(&lines, &search, search_from)
            .ok_or_else(|| format!("hunk {} context not found", n + 1))?;

        let mut replaced: Vec<String> = Vec::new();
        for l in &hunk.lines {
            match (l, reverse) {
                (HunkLine::Context(s), _) => replaced.push(s.clone()),
                (HunkLine::Add(s), false) => replaced.push(s.clone()),
                (HunkLine::Del(s), true) => replaced.push(s.clone()),
                _ => {}
            }
        }

        lines.splice(pos..pos + search.len(), replaced.iter().cloned());
        search_from = pos + replaced.len();
    }

    let mut out = lines.join("\n");
    if had_trailing_newline {
        out.push('\n');
    }
    Ok(out)
}

fn find_window(lines: &[String], search: &[&str], from: usize) -> Option<usize> {
    if search.is_empty() {
        return Some(lines.len());
    }
    if lines.len() < search.len() {
        return None;
    }
    (from..=(lines.len() - search.len()))
        .find(|&i| lines[i..i + search.len()].iter().zip(search).all(|(a, b)| a == b))
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
