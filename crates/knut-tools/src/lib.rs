// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
pub mod builtin;
mod registry;
mod tool;

pub use builtin::list::{is_ignored_dir, IGNORED_DIRS};
pub use builtin::lsp::{Diagnostic, LspState};
pub use builtin::todo::{TodoItem, TodoPriority, TodoStatus, TodoStore};
pub use builtin::{register_builtins, ToolState};
pub use registry::ToolRegistry;
pub use tool::{Tool, ToolContext, ToolResult, ToolUpdate};
