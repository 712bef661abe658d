//! Request and response shapes shared by the registry and its transports.

use std::time::Duration;

use forge_primitives::ToolName;
use forge_store::GeneratedTool;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// How a tool is executed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionMode {
    /// Compiled into the binary.
    Builtin,
    /// Lua handler run inside the sandbox.
    Sandboxed,
}

/// Public description of a registered tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: ToolName,
    /// What the tool does.
    pub description: String,
    /// Grouping label.
    pub category: String,
    /// Argument schema.
    pub input_schema: Value,
    /// Execution mode.
    pub mode: ExecutionMode,
}

impl ToolDefinition {
    /// Describes a built-in tool.
    #[must_use]
    pub fn builtin(
        name: ToolName,
        description: impl Into<String>,
        category: impl Into<String>,
        input_schema: Value,
    ) -> Self {
        Self {
            name,
            description: description.into(),
            category: category.into(),
            input_schema,
            mode: ExecutionMode::Builtin,
        }
    }
}

impl From<&GeneratedTool> for ToolDefinition {
    fn from(tool: &GeneratedTool) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            category: tool.category.clone(),
            input_schema: tool.input_schema.clone(),
            mode: ExecutionMode::Sandboxed,
        }
    }
}

/// Per-call options supplied by the transport.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExecutionContext {
    /// `Some(false)` forbids evolving a missing tool for this call.
    pub auto_evolve: Option<bool>,
    /// Caller's description of the desired tool, used as a generation hint.
    pub description: Option<String>,
    /// Authenticated caller, for logging only.
    pub user: Option<String>,
    /// Requested handler deadline; clamped by the sandbox.
    pub timeout: Option<Duration>,
}

impl ExecutionContext {
    /// Sets the auto-evolve override.
    #[must_use]
    pub fn with_auto_evolve(mut self, enabled: bool) -> Self {
        self.auto_evolve = Some(enabled);
        self
    }

    /// Sets the generation hint.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Sets the caller identity.
    #[must_use]
    pub fn with_user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }
}

/// Result of `tools/call`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCallResult {
    /// Content items, each at least `{type, text}`.
    pub content: Vec<Value>,
    /// Set when the call failed in an expected way.
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_error: bool,
    /// Extra information, e.g. evolution details.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

impl ToolCallResult {
    /// Successful single-text result.
    #[must_use]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![text_item(text)],
            is_error: false,
            metadata: None,
        }
    }

    /// Failed single-text result.
    #[must_use]
    pub fn error(text: impl Into<String>) -> Self {
        Self {
            content: vec![text_item(text)],
            is_error: true,
            metadata: None,
        }
    }

    /// Inserts a metadata entry.
    #[must_use]
    pub fn with_metadata(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.into(), value);
        self
    }

    /// Concatenated text of every text item.
    #[must_use]
    pub fn text_content(&self) -> String {
        self.content
            .iter()
            .filter_map(|item| item.get("text").and_then(Value::as_str))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

fn text_item(text: impl Into<String>) -> Value {
    json!({ "type": "text", "text": text.into() })
}
