// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
//! Language-server probe tools.
//!
//! The language-server client itself lives outside this crate; it pushes
//! diagnostics and hover results into the shared [`LspState`], and these
//! tools surface that cache to the model.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tool::{Tool, ToolContext, ToolResult};

/// One cached diagnostic.  Severity follows the LSP numbering:
/// 1 error, 2 warning, 3 info, 4 hint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Diagnostic {
    pub severity: u8,
    /// 0-based line, as reported by the server.
    pub line: u32,
    /// 0-based column.
    pub column: u32,
    pub message: String,
}

fn severity_name(severity: u8) -> &'static str {
    match severity {
        1 => "ERROR",
        2 => "WARNING",
        3 => "INFO",
        4 => "HINT",
        _ => "UNKNOWN",
    }
}

/// Process-wide cache written by the language-server wrapper and read by the
/// probe tools.  Cloning shares the underlying maps.
#[derive(Clone, Default)]
pub struct LspState {
    diagnostics: Arc<Mutex<HashMap<PathBuf, Vec<Diagnostic>>>>,
    hovers: Arc<Mutex<HashMap<(PathBuf, u32, u32), String>>>,
}

impl LspState {
    /// Replace the cached diagnostics for one file.
    pub fn set_diagnostics(&self, file: impl Into<PathBuf>, diagnostics: Vec<Diagnostic>) {
        self.diagnostics.lock().unwrap().insert(file.into(), diagnostics);
    }

    /// Record hover text for a position.
    pub fn set_hover(&self, file: impl Into<PathBuf>, line: u32, column: u32, text: String) {
        self.hovers.lock().unwrap().insert((file.into(), line, column), text);
    }

    fn diagnostics_for(&self, file: Option<&str>) -> HashMap<PathBuf, Vec<Diagnostic>> {
        let all = self.diagnostics.lock().unwrap();
        match file {
            Some(f) => {
                let key = PathBuf::from(f);
                all.get(&key)
                    .map(|d| HashMap::from([(key, d.clone())]))
                    .unwrap_or_default()
            }
            None => all.clone(),
        }
    }

    fn hover_for(&self, file: &str, line: u32, column: u32) -> Option<String> {
        self.hovers
            .lock()
            .unwrap()
            .get(&(PathBuf::from(file), line, column))
            .cloned()
    }
}

/// Return cached language-server diagnostics, optionally filtered by file.
pub struct LspDiagnosticsTool {
    state: LspState,
}

impl LspDiagnosticsTool {
    pub fn new(state: LspState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Tool for LspDiagnosticsTool {
    fn id(&self) -> &str {
        "lsp_diagnostics"
    }

    fn description(&self) -> &str {
        "Get language server diagnostics (errors, warnings, hints) for files"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "Optional file path to get diagnostics for. If not provided, gets diagnostics for all files."
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let file = args.get("file_path").and_then(|v| v.as_str());
        let by_file = self.state.diagnostics_for(file);

        let mut total = 0usize;
        let mut sections: Vec<String> = Vec::new();
        let mut paths: Vec<&PathBuf> = by_file.keys().collect();
        paths.sort();
        for path in paths {
            let diagnostics = &by_file[path];
            if diagnostics.is_empty() {
                continue;
            }
            let mut section = format!("\n{}:", path.display());
            for d in diagnostics {
                section.push_str(&format!(
                    "\n  Line {}:{} [{}] {}",
                    d.line + 1,
                    d.column + 1,
                    severity_name(d.severity),
                    d.message
                ));
                total += 1;
            }
            sections.push(section);
        }

        let output = if total == 0 {
            "No diagnostics found.".to_string()
        } else {
            format!("Found {total} diagnostic issues:\n{}", sections.join("\n"))
        };

        Ok(ToolResult::new(format!("LSP Diagnostics ({total} issues)"), output)
            .with_metadata("total_issues", json!(total)))
    }
}

/// Hover info at file:line:col from the cache.
pub struct LspHoverTool {
    state: LspState,
}

impl LspHoverTool {
    pub fn new(state: LspState) -> Self {
        Self { state }
    }
}

#[async_trait]
impl Tool for LspHoverTool {
    fn id(&self) -> &str {
        "lsp_hover"
    }

    fn description(&self) -> &str {
        "Get hover information (documentation, type info) for symbols at specific positions"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "file_path": {
                    "type": "string",
                    "description": "The file path to get hover information for"
                },
                "line": {
                    "type": "integer",
                    "description": "The line number (0-based)"
                },
                "character": {
                    "type": "integer",
                    "description": "The character position (0-based)"
                }
            },
            "required": ["file_path", "line", "character"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let Some(file) = args.get("file_path").and_then(|v| v.as_str()) else {
            return Ok(ToolResult::error("lsp_hover", "missing required parameter 'file_path'"));
        };
        let line = args.get("line").and_then(|v| v.as_u64()).unwrap_or(0) as u32;
        let character = args.get("character").and_then(|v| v.as_u64()).unwrap_or(0) as u32;

        match self.state.hover_for(file, line, character) {
            Some(text) => Ok(ToolResult::new(
                format!("{file}:{}:{}", line + 1, character + 1),
                text,
            )),
            None => Ok(ToolResult::error(
                "lsp_hover",
                format!("no hover information available for {file}:{line}:{character}"),
            )),
        }
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx() -> ToolContext {
        ToolContext::new("s1", "m1", "/tmp")
    }

    #[tokio::test]
    async fn empty_cache_reports_no_diagnostics() {
        let t = LspDiagnosticsTool::new(LspState::default());
        let out = t.execute(json!({}), &ctx()).await.unwrap();
        assert!(out.output.contains("No diagnostics found"));
        assert_eq!(out.metadata["total_issues"], 0);
    }

    #[tokio::test]
    async fn diagnostics_formatted_with_severity_and_position() {
        let state = LspState::default();
        state.set_diagnostics(
            "src/lib.rs",
            vec![Diagnostic {
                severity: 1,
                line: 9,
                column: 4,
                message: "mismatched types".into(),
            }],
        );
        let t = LspDiagnosticsTool::new(state);
        let out = t.execute(json!({}), &ctx()).await.unwrap();
        assert!(out.output.contains("src/lib.rs:"));
        assert!(out.output.contains("Line 10:5 [ERROR] mismatched types"));
        assert_eq!(out.metadata["total_issues"], 1);
    }

    #[tokio::test]
    async fn file_filter_limits_output() {
        let state = LspState::default();
        state.set_diagnostics(
            "a.rs",
            vec![Diagnostic { severity: 2, line: 0, column: 0, message: "unused".into() }],
        );
        state.set_diagnostics(
            "b.rs",
            vec![Diagnostic { severity: 1, line: 0, column: 0, message: "broken".into() }],
        );
        let t = LspDiagnosticsTool::new(state);
        let out = t.execute(json!({"file_path": "a.rs"}), &ctx()).await.unwrap();
        assert!(out.output.contains("unused"));
        assert!(!out.output.contains("broken"));
    }

    #[tokio::test]
    async fn hover_returns_cached_text() {
        let state = LspState::default();
        state.set_hover("src/lib.rs", 3, 7, "fn alpha() -> u32".into());
        let t = LspHoverTool::new(state);
        let out = t
            .execute(
                json!({"file_path": "src/lib.rs", "line": 3, "character": 7}),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(!out.is_error());
        assert_eq!(out.output, "fn alpha() -> u32");
    }

    #[tokio::test]
    async fn hover_miss_is_error_result() {
        let t = LspHoverTool::new(LspState::default());
        let out = t
            .execute(
                json!({"file_path": "src/lib.rs", "line": 1, "character": 1}),
                &ctx(),
            )
            .await
            .unwrap();
        assert!(out.is_error());
        assert!(out.output.contains("no hover information"));
    }
}
