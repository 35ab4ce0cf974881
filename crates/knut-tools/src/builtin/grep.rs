// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use async_trait::async_trait;
use regex::RegexBuilder;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{Tool, ToolContext, ToolResult};

/// Files above this size are skipped — grepping generated blobs wastes time
/// and context.
const MAX_FILE_SIZE: u64 = 1024 * 1024;
const MAX_RESULTS_CAP: usize = 1000;

pub struct GrepTool;

#[async_trait]
impl Tool for GrepTool {
    fn id(&self) -> &str {
        "grep"
    }

    fn description(&self) -> &str {
        "Search for text patterns in files"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "pattern": {
                    "type": "string",
                    "description": "The pattern to search for"
                },
                "file_pattern": {
                    "type": "string",
                    "description": "File pattern to search in (glob pattern, default '*')"
                },
                "directory": {
                    "type": "string",
                    "description": "Directory to search in (defaults to current directory)"
                },
                "recursive": {
                    "type": "boolean",
                    "description": "Search recursively in subdirectories (default true)"
                },
                "case_sensitive": {
                    "type": "boolean",
                    "description": "Case sensitive search (default false)"
                },
                "regex": {
                    "type": "boolean",
                    "description": "Treat pattern as regular expression (default false)"
                },
                "max_results": {
                    "type": "integer",
                    "minimum": 1,
                    "maximum": 1000,
                    "description": "Maximum number of results to return (default 100)"
                },
                "context_lines": {
                    "type": "integer",
                    "minimum": 0,
                    "maximum": 10,
                    "description": "Number of context lines to show around matches (default 0)"
                }
            },
            "required": ["pattern"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let Some(pattern) = args.get("pattern").and_then(|v| v.as_str()) else {
            return Ok(ToolResult::error("grep", "missing required parameter 'pattern'"));
        };
        let file_pattern = args
            .get("file_pattern")
            .and_then(|v| v.as_str())
            .unwrap_or("*");
        let recursive = args.get("recursive").and_then(|v| v.as_bool()).unwrap_or(true);
        let case_sensitive = args
            .get("case_sensitive")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        let is_regex = args.get("regex").and_then(|v| v.as_bool()).unwrap_or(false);
        let max_results = (args
            .get("max_results")
            .and_then(|v| v.as_u64())
            .unwrap_or(100) as usize)
            .clamp(1, MAX_RESULTS_CAP);
        let context_lines = (args
            .get("context_lines")
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as usize)
            .min(10);

        let dir = match args.get("directory").and_then(|v| v.as_str()) {
            Some(d) => match ctx.resolve_path(d) {
                Ok(p) => p,
                Err(e) => return Ok(ToolResult::error("grep", e.to_string())),
            },
            None => ctx.workspace_root.clone(),
        };
        if !dir.is_dir() {
            return Ok(ToolResult::error(
                "grep",
                format!("Directory not found: {}", dir.display()),
            ));
        }

        debug!(pattern, dir = %dir.display(), recursive, "grep tool");

        let source = if is_regex {
            pattern.to_string()
        } else {
            regex::escape(pattern)
        };
        let re = match RegexBuilder::new(&source)
            .case_insensitive(!case_sensitive)
            .build()
        {
            Ok(re) => re,
            Err(e) => {
                return Ok(ToolResult::error("grep", format!("Invalid regex pattern: {e}")));
            }
        };

        let name_re = match glob_to_regex(file_pattern) {
            Ok(re) => re,
            Err(e) => {
                return Ok(ToolResult::error("grep", format!("Invalid file pattern: {e}")));
            }
        };

        let max_depth = if recursive { usize::MAX } else { 1 };
        let mut files_searched = 0usize;
        let mut matches: Vec<FileMatch> = Vec::new();

        for entry in WalkDir::new(&dir)
            .max_depth(max_depth)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            if matches.len() >= max_results {
                break;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if !name_re.is_match(&name) {
                continue;
            }
            if entry.metadata().map(|m| m.len() > MAX_FILE_SIZE).unwrap_or(true) {
                continue;
            }
            let Ok(bytes) = std::fs::read(entry.path()) else {
                continue;
            };
            if is_binary(&bytes) {
                continue;
            }
            files_searched += 1;

            let text = String::from_utf8_lossy(&bytes);
            let lines: Vec<&str> = text.lines().collect();
            for (idx, line) in lines.iter().enumerate() {
                if matches.len() >= max_results {
                    break;
                }
                if re.is_match(line) {
                    let context = render_context(&lines, idx, context_lines);
                    matches.push(FileMatch {
                        file: entry.path().to_path_buf(),
                        line_number: idx + 1,
                        line: line.to_string(),
                        context,
                    });
                }
            }
        }

        let output = if matches.is_empty() {
            format!("No matches found for pattern: {pattern}")
        } else {
            format_results(&matches, ctx)
        };

        Ok(ToolResult::new(format!("Found {} matches", matches.len()), output)
            .with_metadata("pattern", json!(pattern))
            .with_metadata("files_searched", json!(files_searched))
            .with_metadata("matches_found", json!(matches.len())))
    }
}

struct FileMatch {
    file: std::path::PathBuf,
    line_number: usize,
    line: String,
    context: Vec<String>,
}

/// Lines around a match, the match line marked with `>`.
fn render_context(lines: &[&str], match_idx: usize, context_lines: usize) -> Vec<String> {
    if context_lines == 0 {
        return Vec::new();
    }
    let start = match_idx.saturating_sub(context_lines);
    let end = (match_idx + context_lines + 1).min(lines.len());
    (start..end)
        .map(|i| {
            let prefix = if i == match_idx { ">" } else { " " };
            format!("{prefix} {:4}: {}", i + 1, lines[i])
        })
        .collect()
}

fn format_results(matches: &[FileMatch], ctx: &ToolContext) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut current: Option<&std::path::Path> = None;
    for m in matches {
        if current != Some(m.file.as_path()) {
            if current.is_some() {
                out.push(String::new());
            }
            out.push(format!("=== {} ===", ctx.display_path(&m.file)));
            current = Some(m.file.as_path());
        }
        if m.context.is_empty() {
            out.push(format!("> {:4}: {}", m.line_number, m.line));
        } else {
            out.extend(m.context.iter().cloned());
        }
    }
    out.join("\n")
}

/// Null byte in the leading kilobyte marks a file binary.
fn is_binary(bytes: &[u8]) -> bool {
    bytes[..bytes.len().min(1024)].contains(&0)
}

/// Translate a shell glob (`*` and `?` wildcards) into an anchored regex.
pub(crate) fn glob_to_regex(pattern: &str) -> Result<regex::Regex, regex::Error> {
    let mut source = String::with_capacity(pattern.len() + 8);
    source.push('^');
    for c in pattern.chars() {
        match c {
            '*' => source.push_str(".*"),
            '?' => source.push('.'),
            c if "\\.+()|[]{}^$".contains(c) => {
                source.push('\\');
                source.push(c);
            }
            c => source.push(c),
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
        std::fs::write(dir.path().join("a.rs"), "fn alpha() {}\nfn beta() {}\n").unwrap();
        std::fs::create_dir(dir.path().join("sub")).unwrap();
        std::fs::write(dir.path().join("sub/b.rs"), "fn alpha_two() {}\n").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "alpha notes\n").unwrap();
        dir
    }

    #[tokio::test]
    async fn finds_matches_grouped_by_file() {
        let dir = setup();
        let out = GrepTool
            .execute(json!({"pattern": "alpha"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(!out.is_error());
        assert!(out.output.contains("=== a.rs ==="));
        assert!(out.output.contains("alpha"));
        assert_eq!(out.metadata["matches_found"], 3);
    }

    #[tokio::test]
    async fn file_pattern_filters_by_name() {
        let dir = setup();
        let out = GrepTool
            .execute(
                json!({"pattern": "alpha", "file_pattern": "*.rs"}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert!(!out.output.contains("notes.txt"));
        assert_eq!(out.metadata["matches_found"], 2);
    }

    #[tokio::test]
    async fn non_recursive_skips_subdirectories() {
        let dir = setup();
        let out = GrepTool
            .execute(
                json!({"pattern": "alpha_two", "recursive": false}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert!(out.output.contains("No matches"));
    }

    #[tokio::test]
    async fn case_insensitive_by_default() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "HELLO world\n").unwrap();
        let out = GrepTool
            .execute(json!({"pattern": "hello"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(out.metadata["matches_found"], 1);

        let strict = GrepTool
            .execute(
                json!({"pattern": "hello", "case_sensitive": true}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(strict.metadata["matches_found"], 0);
    }

    #[tokio::test]
    async fn literal_mode_escapes_regex_metacharacters() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "a.b\naxb\n").unwrap();
        let out = GrepTool
            .execute(json!({"pattern": "a.b"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(out.metadata["matches_found"], 1);
    }

    #[tokio::test]
    async fn regex_mode_uses_pattern_verbatim() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "a.b\naxb\n").unwrap();
        let out = GrepTool
            .execute(json!({"pattern": "a.b", "regex": true}), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(out.metadata["matches_found"], 2);
    }

    #[tokio::test]
    async fn invalid_regex_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = GrepTool
            .execute(json!({"pattern": "([", "regex": true}), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(out.is_error());
        assert!(out.output.contains("Invalid regex"));
    }

    #[tokio::test]
    async fn context_lines_render_around_match() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("f.txt"), "one\ntwo\nthree\nfour\n").unwrap();
        let out = GrepTool
            .execute(
                json!({"pattern": "three", "context_lines": 1}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert!(out.output.contains("  2: two"));
        assert!(out.output.contains(">    3: three"));
        assert!(out.output.contains("  4: four"));
    }

    #[tokio::test]
    async fn binary_files_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("bin.dat"), b"alpha\x00beta").unwrap();
        let out = GrepTool
            .execute(json!({"pattern": "alpha"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert_eq!(out.metadata["matches_found"], 0);
    }

    #[tokio::test]
    async fn max_results_caps_output() {
        let dir = tempfile::tempdir().unwrap();
        let content: String = (0..50).map(|i| format!("match line {i}\n")).collect();
        std::fs::write(dir.path().join("f.txt"), content).unwrap();
        let out = GrepTool
            .execute(
                json!({"pattern": "match", "max_results": 5}),
                &ctx(dir.path()),
            )
            .await
            .unwrap();
        assert_eq!(out.metadata["matches_found"], 5);
    }

    #[test]
    fn glob_translation_matches_expected() {
        let re = glob_to_regex("*.rs").unwrap();
        assert!(re.is_match("lib.rs"));
        assert!(!re.is_match("lib.rs.bak"));
        let q = glob_to_regex("a?c").unwrap();
        assert!(q.is_match("abc"));
        assert!(!q.is_match("abbc"));
    }
}
