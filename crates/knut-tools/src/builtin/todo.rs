// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::tool::{Tool, ToolContext, ToolResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TodoStatus {
    Pending,
    InProgress,
    Completed,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TodoPriority {
    High,
    Medium,
    Low,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TodoItem {
    pub id: String,
    pub content: String,
    pub status: TodoStatus,
    pub priority: TodoPriority,
}

/// Per-session to-do lists held in process-wide state.  Cloning shares the
/// underlying map.
#[derive(Clone, Default)]
pub struct TodoStore {
    lists: Arc<Mutex<HashMap<String, Vec<TodoItem>>>>,
}

impl TodoStore {
    pub fn get(&self, session_id: &str) -> Vec<TodoItem> {
        self.lists
            .lock()
            .unwrap()
            .get(session_id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn set(&self, session_id: &str, todos: Vec<TodoItem>) {
        self.lists.lock().unwrap().insert(session_id.to_string(), todos);
    }
}

fn incomplete_count(todos: &[TodoItem]) -> usize {
    todos
        .iter()
        .filter(|t| t.status != TodoStatus::Completed)
        .count()
}

pub struct TodoWriteTool {
    store: TodoStore,
}

impl TodoWriteTool {
    pub fn new(store: TodoStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TodoWriteTool {
    fn id(&self) -> &str {
        "todo_write"
    }

    fn description(&self) -> &str {
        "Create and manage a structured task list for the current coding session"
    }

    fn parameters_schema(&self) -> Value {
        json!({
            "type": "object",
            "properties": {
                "todos": {
                    "type": "array",
                    "description": "The updated todo list",
                    "items": {
                        "type": "object",
                        "properties": {
                            "id": { "type": "string" },
                            "content": { "type": "string", "minLength": 1 },
                            "status": {
                                "type": "string",
                                "enum": ["pending", "in_progress", "completed", "cancelled"]
                            },
                            "priority": {
                                "type": "string",
                                "enum": ["high", "medium", "low"]
                            }
                        },
                        "required": ["id", "content", "status", "priority"]
                    }
                }
            },
            "required": ["todos"],
            "additionalProperties": false
        })
    }

    async fn execute(&self, args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let Some(raw) = args.get("todos") else {
            return Ok(ToolResult::error("todo_write", "missing required parameter 'todos'"));
        };
        let todos: Vec<TodoItem> = match serde_json::from_value(raw.clone()) {
            Ok(t) => t,
            Err(e) => {
                return Ok(ToolResult::error("todo_write", format!("invalid todos: {e}")));
            }
        };

        self.store.set(&ctx.session_id, todos.clone());

        let output = serde_json::to_string_pretty(&todos).unwrap_or_default();
        Ok(ToolResult::new(format!("{} todos", incomplete_count(&todos)), output)
            .with_metadata("todos", json!(todos)))
    }
}

pub struct TodoReadTool {
    store: TodoStore,
}

impl TodoReadTool {
    pub fn new(store: TodoStore) -> Self {
        Self { store }
    }
}

#[async_trait]
impl Tool for TodoReadTool {
    fn id(&self) -> &str {
        "todo_read"
    }

    fn description(&self) -> &str {
        "Read the current to-do list for the session"
    }

    fn parameters_schema(&self) -> Value {
        json!({ "type": "object", "properties": {}, "additionalProperties": false })
    }

    async fn execute(&self, _args: Value, ctx: &ToolContext) -> anyhow::Result<ToolResult> {
        let todos = self.store.get(&ctx.session_id);
        let output = serde_json::to_string_pretty(&todos).unwrap_or_default();
        Ok(ToolResult::new(format!("{} todos", incomplete_count(&todos)), output)
            .with_metadata("todos", json!(todos)))
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────
