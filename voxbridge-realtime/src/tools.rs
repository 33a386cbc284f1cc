//! Local capabilities the engine can invoke.

use crate::config::ToolDefinition;
use crate::error::Result;
use crate::events::{FunctionCall, FunctionResponse};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::Instrument;
use voxbridge_telemetry::tool_execute_span;

/// Handler for tool/function calls from the engine.
#[async_trait]
pub trait ToolHandler: Send + Sync {
    /// Execute a tool call and return the result.
    async fn execute(&self, call: &FunctionCall) -> Result<Value>;
}

/// A simple function-based tool handler.
pub struct FnToolHandler<F>
where
    F: Fn(&FunctionCall) -> Result<Value> + Send + Sync,
{
    handler: F,
}

impl<F> FnToolHandler<F>
where
    F: Fn(&FunctionCall) -> Result<Value> + Send + Sync,
{
    /// Create a new function-based tool handler.
    pub fn new(handler: F) -> Self {
        Self { handler }
    }
}

#[async_trait]
impl<F> ToolHandler for FnToolHandler<F>
where
    F: Fn(&FunctionCall) -> Result<Value> + Send + Sync,
{
    async fn execute(&self, call: &FunctionCall) -> Result<Value> {
        (self.handler)(call)
    }
}

/// Named tool handlers with their declarations.
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, (ToolDefinition, Arc<dyn ToolHandler>)>,
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool with its handler.
    pub fn tool(mut self, definition: ToolDefinition, handler: impl ToolHandler + 'static) -> Self {
        let name = definition.name.clone();
        self.tools.insert(name, (definition, Arc::new(handler)));
        self
    }

    /// Register a tool with a sync function handler.
    pub fn tool_fn<F>(self, definition: ToolDefinition, handler: F) -> Self
    where
        F: Fn(&FunctionCall) -> Result<Value> + Send + Sync + 'static,
    {
        self.tool(definition, FnToolHandler::new(handler))
    }

    /// Declarations to advertise in the engine setup.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self.tools.values().map(|(d, _)| d.clone()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Whether a tool named `name` is registered.
    pub fn contains(&self, name: &str) -> bool {
        self.tools.contains_key(name)
    }

    /// Number of registered tools.
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Run one call, always producing a response.
    ///
    /// Handler failures become `{"error": ...}`; unknown names become a
    /// result carrying an error object, and neither is raised.
    pub async fn dispatch(&self, call: &FunctionCall) -> FunctionResponse {
        let Some((_, handler)) = self.tools.get(&call.name) else {
            tracing::warn!(tool = %call.name, call_id = %call.id, "Unknown tool called");
            let error = format!("Unknown function: {}", call.name);
            return FunctionResponse::result(call, json!({ "error": error }));
        };

        let span = tool_execute_span(&call.name, &call.id);
        match handler.execute(call).instrument(span).await {
            Ok(value) => FunctionResponse::result(call, value),
            Err(e) => {
                tracing::warn!(tool = %call.name, error = %e, "Tool execution failed");
                FunctionResponse::error(call, e.to_string())
            }
        }
    }
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&String> = self.tools.keys().collect();
        names.sort();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}
