// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::path::{Component, Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

/// Incremental title/metadata update emitted by a running tool.
#[derive(Debug, Clone)]
pub struct ToolUpdate {
    pub call_id: String,
    pub title: Option<String>,
    pub metadata: serde_json::Map<String, Value>,
}

/// Per-invocation context handed to every tool.
///
/// The cancellation token is borrowed from the turn: tools observe it at
/// their suspension points and abandon work when it fires.  The workspace
/// root scopes relative paths; see [`ToolContext::resolve_path`].
#[derive(Clone)]
pub struct ToolContext {
    pub session_id: String,
    pub message_id: String,
    pub cancel: CancellationToken,
    pub workspace_root: PathBuf,
    /// Optional channel for incremental updates while the tool runs.
    pub updates: Option<mpsc::UnboundedSender<ToolUpdate>>,
    /// Call id of the invocation currently executing, for update routing.
    pub call_id: String,
}

impl ToolContext {
    pub fn new(
        session_id: impl Into<String>,
        message_id: impl Into<String>,
        workspace_root: impl Into<PathBuf>,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            message_id: message_id.into(),
            cancel: CancellationToken::new(),
            workspace_root: workspace_root.into(),
            updates: None,
            call_id: String::new(),
        }
    }

    pub fn with_cancel(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Send an incremental update; silently dropped when no listener is wired.
    pub fn update(&self, title: Option<String>, metadata: serde_json::Map<String, Value>) {
        if let Some(tx) = &self.updates {
            let _ = tx.send(ToolUpdate {
                call_id: self.call_id.clone(),
                title,
                metadata,
            });
        }
    }

    /// Resolve a tool-supplied path.
    ///
    /// Absolute paths are honoured as given.  Relative paths resolve under
    /// the workspace root and must not escape it after lexical
    /// normalisation (`..` components are folded before the check).
    pub fn resolve_path(&self, raw: &str) -> anyhow::Result<PathBuf> {
        let p = Path::new(raw);
        if p.is_absolute() {
            return Ok(normalize(p));
        }
        let joined = normalize(&self.workspace_root.join(p));
        if !joined.starts_with(&self.workspace_root) {
            anyhow::bail!("path escapes workspace root: {raw}");
        }
        Ok(joined)
    }

    /// Render a path workspace-relative when possible, for output shown to
    /// the model.
    pub fn display_path(&self, path: &Path) -> String {
        path.strip_prefix(&self.workspace_root)
            .unwrap_or(path)
            .display()
            .to_string()
    }
}

/// Fold `.` and `..` components without touching the filesystem.
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}

/// The outcome of a tool execution.
///
/// Failures travel in-band: `metadata["error"]` is set and `output` describes
/// what went wrong, so the model can react instead of the turn dying.
#[derive(Debug, Clone)]
pub struct ToolResult {
    pub title: String,
    pub metadata: serde_json::Map<String, Value>,
    pub output: String,
}

impl ToolResult {
    pub fn new(title: impl Into<String>, output: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            metadata: serde_json::Map::new(),
            output: output.into(),
        }
    }

    pub fn with_metadata(mut self, key: &str, value: Value) -> Self {
        self.metadata.insert(key.to_string(), value);
        self
    }

    /// An error-shaped result.
    pub fn error(title: impl Into<String>, message: impl Into<String>) -> Self {
        let message = message.into();
        let mut metadata = serde_json::Map::new();
        metadata.insert("error".into(), Value::String(message.clone()));
        Self {
            title: title.into(),
            metadata,
            output: message,
        }
    }

    pub fn is_error(&self) -> bool {
        self.metadata.contains_key("error")
    }
}

/// A capability-bounded action invokable by the model.
#[async_trait]
pub trait Tool: Send + Sync {
    /// Stable short identifier used in mode allow-lists and model calls.
    fn id(&self) -> &str;
    fn description(&self) -> &str;
    /// JSON Schema of the parameters object.
    fn parameters_schema(&self) -> Value;
    /// Execute with parsed JSON arguments.  May return `Err` for internal
    /// failures; the registry normalises those into error results.
    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult>;
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ctx(root: &Path) -> ToolContext {
        ToolContext::new("s1", "m1", root)
    }

    #[test]
    fn relative_path_resolves_under_workspace() {
        let ctx = ctx(Path::new("/work/repo"));
        let p = ctx.resolve_path("src/main.rs").unwrap();
        assert_eq!(p, PathBuf::from("/work/repo/src/main.rs"));
    }

    #[test]
    fn dotdot_escape_is_rejected() {
        let ctx = ctx(Path::new("/work/repo"));
        assert!(ctx.resolve_path("../outside.txt").is_err());
        assert!(ctx.resolve_path("a/../../../etc/passwd").is_err());
    }

    #[test]
    fn interior_dotdot_is_allowed() {
        let ctx = ctx(Path::new("/work/repo"));
        let p = ctx.resolve_path("src/../docs/readme.md").unwrap();
        assert_eq!(p, PathBuf::from("/work/repo/docs/readme.md"));
    }

    #[test]
    fn absolute_path_is_honoured() {
        let ctx = ctx(Path::new("/work/repo"));
        let p = ctx.resolve_path("/etc/hosts").unwrap();
        assert_eq!(p, PathBuf::from("/etc/hosts"));
    }

    #[test]
    fn display_path_strips_workspace_prefix() {
        let ctx = ctx(Path::new("/work/repo"));
        assert_eq!(
            ctx.display_path(Path::new("/work/repo/src/lib.rs")),
            "src/lib.rs"
        );
        assert_eq!(ctx.display_path(Path::new("/elsewhere/x")), "/elsewhere/x");
    }

    #[test]
    fn error_result_sets_metadata_error() {
        let r = ToolResult::error("t", "boom");
        assert!(r.is_error());
        assert_eq!(r.metadata["error"], "boom");
        assert_eq!(r.output, "boom");
    }

    #[test]
    fn ok_result_is_not_error() {
        let r = ToolResult::new("t", "fine");
        assert!(!r.is_error());
    }

    #[test]
    fn update_without_listener_is_silent() {
        let ctx = ctx(Path::new("/work"));
        // Must not panic or error.
        ctx.update(Some("title".into()), serde_json::Map::new());
    }
}
