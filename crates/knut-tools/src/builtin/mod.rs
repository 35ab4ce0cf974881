// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod bash;
pub mod edit;
pub mod glob;
pub mod grep;
pub mod list;
pub mod lsp;
pub mod multiedit;
pub mod patch;
pub mod read;
pub mod task;
pub mod todo;
pub mod webfetch;
pub mod write;

pub use bash::BashTool;
pub use edit::EditTool;
pub use glob::GlobTool;
pub use grep::GrepTool;
pub use list::ListTool;
pub use lsp::{LspDiagnosticsTool, LspHoverTool};
pub use multiedit::MultiEditTool;
pub use patch::PatchTool;
pub use read::ReadTool;
pub use task::TaskTool;
pub use todo::{TodoReadTool, TodoWriteTool};
pub use webfetch::WebFetchTool;
pub use write::WriteTool;

use crate::ToolRegistry;

/// Process-wide mutable state shared by stateful tools.  Cloning shares the
/// underlying maps.
#[derive(Clone, Default)]
pub struct ToolState {
    pub todos: todo::TodoStore,
    pub lsp: lsp::LspState,
}

/// Register every built-in tool.
pub fn register_builtins(registry: &mut ToolRegistry, state: &ToolState) {
    registry.register(BashTool::default());
    registry.register(ReadTool);
    registry.register(WriteTool);
    registry.register(EditTool);
    registry.register(MultiEditTool);
    registry.register(PatchTool);
    registry.register(GrepTool);
    registry.register(GlobTool);
    registry.register(ListTool);
    registry.register(WebFetchTool);
    registry.register(LspDiagnosticsTool::new(state.lsp.clone()));
    registry.register(LspHoverTool::new(state.lsp.clone()));
    registry.register(TaskTool);
    registry.register(TodoReadTool::new(state.todos.clone()));
    registry.register(TodoWriteTool::new(state.todos.clone()));
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_builtin_ids_registered() {
        let mut registry = ToolRegistry::new();
        register_builtins(&mut registry, &ToolState::default());
        for id in [
            "bash",
            "read",
            "write",
            "edit",
            "multiedit",
            "patch",
            "grep",
            "glob",
            "list",
            "webfetch",
            "lsp_diagnostics",
            "lsp_hover",
            "task",
            "todo_read",
            "todo_write",
        ] {
            assert!(registry.get(id).is_some(), "missing builtin tool: {id}");
        }
    }
}
