//! Tool dispatch for structured actions requested by the conversation engine.
//!
//! The [`ToolRegistry`] maps tool names to [`ToolHandler`]s and exports
//! their JSON schemas for the chat API's `tools` field.

pub mod builtins;

use crate::error::{AssistantError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{info, warn};

/// A structured tool invocation returned by the conversation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    /// Tool name.
    pub name: String,
    /// Parsed arguments (a JSON object, or `null` when none were given).
    #[serde(default)]
    pub arguments: serde_json::Value,
}

/// Description of a tool offered to the conversation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON Schema for the arguments.
    pub parameters: serde_json::Value,
}

/// An external action handler.
///
/// Handlers perform an OS-level side effect and may return a short
/// acknowledgment to be spoken back to the user.
pub trait ToolHandler: Send + Sync {
    /// Tool name as exposed to the engine.
    fn name(&self) -> &str;

    /// Human-readable description of what the tool does.
    fn description(&self) -> &str;

    /// JSON Schema for the tool's arguments.
    fn schema(&self) -> serde_json::Value;

    /// Run the action.
    ///
    /// # Errors
    ///
    /// Returns [`AssistantError::Tool`] on invalid arguments or a failed action.
    fn execute(&self, args: &serde_json::Value) -> Result<Option<String>>;
}

/// Registry of available tools keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn ToolHandler>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ToolRegistry")
            .field("tools", &self.names())
            .finish()
    }
}

impl ToolRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry holding the built-in `open_app` and `play_music` tools.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(builtins::OpenApp));
        registry.register(Arc::new(builtins::PlayMusic));
        registry
    }

    /// Register a tool. Replaces any existing tool with the same name.
    pub fn register(&mut self, tool: Arc<dyn ToolHandler>) {
        self.tools.insert(tool.name().to_owned(), tool);
    }

    /// Look up a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Sorted tool names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Whether no tools are registered.
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Definitions of every tool, sorted by name.
    pub fn definitions(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|t| ToolDefinition {
                name: t.name().to_owned(),
                description: t.description().to_owned(),
                parameters: t.schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Run the named tool.
    ///
    /// Unknown names are logged and yield `Ok(None)`.
    ///
    /// # Errors
    ///
    /// Propagates the handler's error.
    pub fn dispatch(&self, call: &ToolCall) -> Result<Option<String>> {
        let Some(tool) = self.get(&call.name) else {
            warn!(tool = %call.name, "unknown tool requested, ignoring");
            return Ok(None);
        };
        info!(tool = %call.name, args = %call.arguments, "dispatching tool");
        tool.execute(&call.arguments)
    }
}

/// Parse a tool call the engine wrote into plain text.
///
/// Accepts, optionally inside a Markdown code fence:
/// - `{"type": "function", "function": {"name": ..., "parameters": {...}}}`
/// - `{"name": ..., "arguments" | "parameters": {...}}`
///
/// Returns `None` for anything else.
pub fn extract_tool_call_from_text(text: &str) -> Option<ToolCall> {
    let body = strip_code_fence(text.trim());
    let value: serde_json::Value = serde_json::from_str(body).ok()?;
    let obj = value.as_object()?;

    let func = obj
        .get("function")
        .and_then(|f| f.as_object())
        .unwrap_or(obj);

    let name = func.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }
    let arguments = func
        .get("arguments")
        .or_else(|| func.get("parameters"))
        .cloned()
        .map(parse_arguments)
        .unwrap_or(serde_json::Value::Null);

    Some(ToolCall {
        name: name.to_owned(),
        arguments,
    })
}

/// Arguments may arrive as an object or as a JSON-encoded string.
pub(crate) fn parse_arguments(raw: serde_json::Value) -> serde_json::Value {
    match raw {
        serde_json::Value::String(s) if s.trim().is_empty() => serde_json::Value::Null,
        serde_json::Value::String(s) => serde_json::from_str(&s).unwrap_or(serde_json::Value::String(s)),
        other => other,
    }
}

fn strip_code_fence(text: &str) -> &str {
    let Some(rest) = text.strip_prefix("```") else {
        return text;
    };
    let rest = rest.strip_prefix("json").unwrap_or(rest);
    rest.trim().strip_suffix("```").unwrap_or(rest).trim()
}

/// Read a required string argument, trying each key in order.
pub(crate) fn required_str<'a>(args: &'a serde_json::Value, keys: &[&str]) -> Result<&'a str> {
    keys.iter()
        .find_map(|k| args.get(*k).and_then(|v| v.as_str()))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| AssistantError::Tool(format!("missing required argument '{}'", keys[0])))
}
