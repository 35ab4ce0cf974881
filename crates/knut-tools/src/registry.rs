// Copyright (c) 2024-2026 Martin Schröder <info@swedishembedded.com>
//
// SPDX-License-Identifier: MIT
use std::collections::HashMap;
use std::sync::Arc;

use futures::FutureExt;
use serde_json::{json, Value};
use tracing::debug;

use crate::{Tool, ToolContext, ToolResult};

/// Process-lifetime registry of all available tools.
///
/// Dispatch never lets a failure cross the registry boundary as an exception:
/// argument problems, `Err` returns, and panics all come back as error-shaped
/// [`ToolResult`]s that the model gets to see and react to.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    pub fn register(&mut self, tool: impl Tool + 'static) {
        self.tools.insert(tool.id().to_string(), Arc::new(tool));
    }

    pub fn get(&self, id: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(id).cloned()
    }

    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.tools.keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Tools from `allowed_ids`, in the order given.  Unknown ids are skipped.
    pub fn list_available(&self, allowed_ids: &[String]) -> Vec<Arc<dyn Tool>> {
        allowed_ids
            .iter()
            .filter_map(|id| self.tools.get(id).cloned())
            .collect()
    }

    /// Package tools as provider-compatible function-calling declarations.
    pub fn to_schema(tools: &[Arc<dyn Tool>]) -> Vec<Value> {
        tools
            .iter()
            .map(|t| {
                json!({
                    "type": "function",
                    "function": {
                        "name": t.id(),
                        "description": t.description(),
                        "parameters": t.parameters_schema(),
                    }
                })
            })
            .collect()
    }

    /// Execute a call by id.  The arguments must be a JSON object (`null` is
    /// coerced to `{}`); anything else is an argument error.
    pub async fn execute(&self, id: &str, args: Value, ctx: &ToolContext) -> ToolResult {
        let Some(tool) = self.get(id) else {
            return ToolResult::error(format!("Tool Error: {id}"), format!("unknown tool: {id}"));
        };

        let args = match args {
            Value::Object(map) => Value::Object(map),
            Value::Null => json!({}),
            other => {
                return ToolResult::error(
                    format!("Tool Error: {id}"),
                    format!("invalid arguments for tool '{id}': expected object, got {other}"),
                );
            }
        };

        debug!(tool = id, session = %ctx.session_id, "executing tool");

        // A panicking tool must not take the turn down with it.
        let outcome = std::panic::AssertUnwindSafe(tool.execute(args, ctx))
            .catch_unwind()
            .await;

        match outcome {
            Ok(Ok(result)) => result,
            Ok(Err(e)) => ToolResult::error(
                format!("Tool Error: {id}"),
                format!("Error executing {id}: {e:#}"),
            ),
            Err(panic) => {
                let msg = panic
                    .downcast_ref::<&str>()
                    .map(|s| s.to_string())
                    .or_else(|| panic.downcast_ref::<String>().cloned())
                    .unwrap_or_else(|| "unknown panic".into());
                ToolResult::error(
                    format!("Tool Error: {id}"),
                    format!("Error executing {id}: tool panicked: {msg}"),
                )
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─── Unit tests ──────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use async_trait::async_trait;

    use super::*;

    struct EchoTool;

    #[async_trait]
    impl Tool for EchoTool {
        fn id(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "echoes its arguments"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, args: Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
            Ok(ToolResult::new("echo", format!("echo:{args}")))
        }
    }

    struct FailingTool;

    #[async_trait]
    impl Tool for FailingTool {
        fn id(&self) -> &str {
            "fail"
        }
        fn description(&self) -> &str {
            "always fails"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
            anyhow::bail!("deliberate failure")
        }
    }

    struct PanickingTool;

    #[async_trait]
    impl Tool for PanickingTool {
        fn id(&self) -> &str {
            "panic"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn parameters_schema(&self) -> Value {
            json!({ "type": "object" })
        }
        async fn execute(&self, _args: Value, _ctx: &ToolContext) -> anyhow::Result<ToolResult> {
            panic!("boom");
        }
    }

    fn ctx() -> ToolContext {
        ToolContext::new("s1", "m1", "/tmp")
    }

    #[test]
    fn register_and_get() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        assert!(reg.get("echo").is_some());
        assert!(reg.get("missing").is_none());
    }

    #[test]
    fn list_available_preserves_order_and_skips_unknown() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        reg.register(FailingTool);
        let tools = reg.list_available(&["fail".into(), "nope".into(), "echo".into()]);
        let ids: Vec<&str> = tools.iter().map(|t| t.id()).collect();
        assert_eq!(ids, vec!["fail", "echo"]);
    }

    #[test]
    fn to_schema_produces_function_declarations() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        let tools = reg.list_available(&["echo".into()]);
        let schemas = ToolRegistry::to_schema(&tools);
        assert_eq!(schemas[0]["type"], "function");
        assert_eq!(schemas[0]["function"]["name"], "echo");
        assert_eq!(schemas[0]["function"]["description"], "echoes its arguments");
    }

    #[tokio::test]
    async fn execute_known_tool_succeeds() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        let out = reg.execute("echo", json!({"x": 1}), &ctx()).await;
        assert!(!out.is_error());
        assert!(out.output.contains("echo:"));
    }

    #[tokio::test]
    async fn execute_unknown_tool_is_error_result() {
        let reg = ToolRegistry::new();
        let out = reg.execute("missing", json!({}), &ctx()).await;
        assert!(out.is_error());
        assert!(out.output.contains("unknown tool"));
    }

    #[tokio::test]
    async fn execute_null_args_coerced_to_empty_object() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        let out = reg.execute("echo", Value::Null, &ctx()).await;
        assert!(!out.is_error());
    }

    #[tokio::test]
    async fn execute_non_object_args_is_error_result() {
        let mut reg = ToolRegistry::new();
        reg.register(EchoTool);
        let out = reg.execute("echo", json!([1, 2]), &ctx()).await;
        assert!(out.is_error());
        assert!(out.output.contains("invalid arguments"));
    }

    #[tokio::test]
    async fn tool_error_becomes_error_result() {
        let mut reg = ToolRegistry::new();
        reg.register(FailingTool);
        let out = reg.execute("fail", json!({}), &ctx()).await;
        assert!(out.is_error());
        assert!(out.output.contains("deliberate failure"));
    }

    #[tokio::test]
    async fn tool_panic_becomes_error_result() {
        let mut reg = ToolRegistry::new();
        reg.register(PanickingTool);
        let out = reg.execute("panic", json!({}), &ctx()).await;
        assert!(out.is_error());
        assert!(out.output.contains("panicked"));
        assert!(out.output.contains("boom"));
    }
}
