// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde_json::{json, Value};
use tracing::debug;
use walkdir::WalkDir;

use crate::tool::{Tool, ToolContext, ToolResult};

const ENTRY_LIMIT: usize = 100;

/// Directory names that are never worth showing the model.
pub const IGNORED_DIRS: &[&str] = &[
    "node_modules",
    "__pycache__",
    ".git",
    "dist",
    "build",
    "target",
    "vendor",
    "bin",
    "obj",
    ".idea",
    ".vscode",
    ".cache",
    "cache",
    "coverage",
    "tmp",
    "temp",
    "logs",
    ".venv",
    "venv",
    "env",
];

pub fn is_ignored_dir(name: &str) -> bool {
    IGNORED_DIRS.contains(&name)
}

/// Render a directory subtree as an indented listing.
pub struct ListTool;

#[async_trait]
impl Tool for ListTool {
    fn id(&self) -> &str {
        "list"
    }

    fn description(&self) -> &str {
        "List directory contents as an indented tree, skipping dependency and \
         build directories. Capped at 100 entries."
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "path": {
                    "type": "string",
                    "description": "The directory to list (defaults to the workspace root)"
                },
                "ignore": {
                    "type": "array",
                    "items": { "type": "string" },
                    "description": "Additional directory or file names to ignore"
                }
            },
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let root = match args.get("path").and_then(|v| v.as_str()) {
            Some(p) => match ctx.resolve_path(p) {
                Ok(p) => p,
                Err(e) => return Ok(ToolResult::error("list", e.to_string())),
            },
            None => ctx.workspace_root.clone(),
        };
        if !root.is_dir() {
            return Ok(ToolResult::error(
                "list",
                format!("Directory not found: {}", root.display()),
            ));
        }
        let extra_ignore: Vec<String> = args
            .get("ignore")
            .and_then(|v| v.as_array())
            .map(|a| {
                a.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default();

        debug!(root = %root.display(), "list tool");

        let mut files: Vec<String> = Vec::new();
        let walker = WalkDir::new(&root).into_iter().filter_entry(|e| {
            let name = e.file_name().to_string_lossy();
            !(e.file_type().is_dir()
                && (is_ignored_dir(&name) || extra_ignore.iter().any(|x| x == name.as_ref())))
        });
        for entry in walker.filter_map(|e| e.ok()) {
            if files.len() >= ENTRY_LIMIT {
                break;
            }
            if !entry.file_type().is_file() {
                continue;
            }
            let name = entry.file_name().to_string_lossy();
            if extra_ignore.iter().any(|x| x == name.as_ref()) {
                continue;
            }
            if let Ok(rel) = entry.path().strip_prefix(&root) {
                files.push(rel.to_string_lossy().to_string());
            }
        }
        let truncated = files.len() >= ENTRY_LIMIT;
        files.sort();

        let output = format!("{}/\n{}", root.display(), render_tree(&files));

        Ok(ToolResult::new(ctx.display_path(&root), output)
            .with_metadata("count", json!(files.len()))
            .with_metadata("truncated", json!(truncated)))
    }
}

/// Render sorted relative file paths as an indented tree.
fn render_tree(files: &[String]) -> String {
    #[derive(Default)]
    struct Node {
        dirs: BTreeMap<String, Node>,
        files: Vec<String>,
    }

    let mut root = Node::default();
    for file in files {
        let path = Path::new(file);
        let mut node = &mut root;
        let components: Vec<&str> = path
            .iter()
            .filter_map(|c| c.to_str())
            .collect();
        if let Some((name, dirs)) = components.split_last() {
            for dir in dirs {
                node = node.dirs.entry(dir.to_string()).or_default();
            }
            node.files.push(name.to_string());
        }
    }

    fn render(node: &Node, depth: usize, out: &mut String) {
        let indent = "  ".repeat(depth);
        for (name, child) in &node.dirs {
            out.push_str(&format!("{indent}{name}/\n"));
            render(child, depth + 1, out);
        }
        for file in &node.files {
            out.push_str(&format!("{indent}{file}\n"));
        }
    }

    let mut out = String::new();
    render(&root, 1, &mut out);
    out
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
        std::fs::write(dir.path().join("README.md"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join("src")).unwrap();
        std::fs::write(dir.path().join("src/lib.rs"), "x").unwrap();
        std::fs::create_dir_all(dir.path().join("node_modules/pkg")).unwrap();
        std::fs::write(dir.path().join("node_modules/pkg/index.js"), "x").unwrap();
        dir
    }

    #[tokio::test]
    async fn renders_indented_tree() {
        let dir = setup();
        let out = ListTool.execute(json!({}), &ctx(dir.path())).await.unwrap();
        assert!(!out.is_error());
        assert!(out.output.contains("  src/\n"));
        assert!(out.output.contains("    lib.rs"));
        assert!(out.output.contains("  README.md"));
    }

    #[tokio::test]
    async fn nuisance_directories_are_skipped() {
        let dir = setup();
        let out = ListTool.execute(json!({}), &ctx(dir.path())).await.unwrap();
        assert!(!out.output.contains("node_modules"));
        assert_eq!(out.metadata["count"], 2);
    }

    #[tokio::test]
    async fn custom_ignore_patterns_apply() {
        let dir = setup();
        let out = ListTool
            .execute(json!({"ignore": ["src"]}), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(!out.output.contains("lib.rs"));
    }

    #[tokio::test]
    async fn entry_cap_flags_truncation() {
        let dir = tempfile::tempdir().unwrap();
        for i in 0..(ENTRY_LIMIT + 20) {
            std::fs::write(dir.path().join(format!("f{i:03}.txt")), "x").unwrap();
        }
        let out = ListTool.execute(json!({}), &ctx(dir.path())).await.unwrap();
        assert_eq!(out.metadata["truncated"], true);
        assert_eq!(out.metadata["count"], ENTRY_LIMIT);
    }

    #[tokio::test]
    async fn missing_directory_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let out = ListTool
            .execute(json!({"path": "missing"}), &ctx(dir.path()))
            .await
            .unwrap();
        assert!(out.is_error());
    }

    #[test]
    fn render_tree_nests_directories() {
        let files = vec!["a/b/c.txt".to_string(), "a/d.txt".to_string(), "top.txt".to_string()];
        let out = render_tree(&files);
        assert!(out.contains("  a/\n"));
        assert!(out.contains("    b/\n"));
        assert!(out.contains("      c.txt\n"));
        assert!(out.contains("    d.txt\n"));
        assert!(out.contains("  top.txt\n"));
    }
}
