//! Tool providers: the catalogue of host capabilities scripts can invoke.

pub mod bridge;
mod local;
mod notes;

pub use bridge::{AsyncBridge, BridgeError, ToolsApi, ToolsApiError};
pub use local::LocalToolProvider;
pub use notes::NotesToolProvider;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;

use crate::context::ExecutionContext;
use crate::db::DbError;

/// Tool arguments keyed by parameter name.
pub type ToolArguments = Map<String, JsonValue>;

/// Description of a tool, with its parameters as a JSON schema object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    /// Unique tool name.
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// JSON schema for the arguments (`{"type": "object", "properties": …, "required": […]}`).
    pub parameters: JsonValue,
}

impl ToolDefinition {
    /// Definition with the given schema.
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        parameters: JsonValue,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }

    /// Names from the schema's `required` list, in declaration order.
    pub fn required_params(&self) -> Vec<String> {
        self.parameters
            .get("required")
            .and_then(JsonValue::as_array)
            .map(|names| {
                names
                    .iter()
                    .filter_map(JsonValue::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Result of a tool call.
#[derive(Debug, Clone, PartialEq)]
pub enum ToolOutput {
    /// Plain text.
    Text(String),
    /// Structured result.
    Json(JsonValue),
}

impl ToolOutput {
    /// Text form handed back to scripts: strings pass through, everything
    /// else is JSON-encoded.
    pub fn into_text(self) -> String {
        match self {
            ToolOutput::Text(text) => text,
            ToolOutput::Json(JsonValue::String(text)) => text,
            ToolOutput::Json(value) => value.to_string(),
        }
    }
}

impl From<String> for ToolOutput {
    fn from(text: String) -> Self {
        ToolOutput::Text(text)
    }
}

impl From<&str> for ToolOutput {
    fn from(text: &str) -> Self {
        ToolOutput::Text(text.to_string())
    }
}

impl From<JsonValue> for ToolOutput {
    fn from(value: JsonValue) -> Self {
        ToolOutput::Json(value)
    }
}

/// Tool execution errors.
#[derive(Debug, Error)]
pub enum ToolError {
    /// No tool with this name.
    #[error("tool '{0}' not found")]
    NotFound(String),

    /// Arguments did not match the tool's parameters.
    #[error("invalid arguments for '{tool}': {message}")]
    InvalidArguments {
        /// Tool name.
        tool: String,
        /// What was wrong.
        message: String,
    },

    /// The tool ran and failed.
    #[error("{0}")]
    Execution(String),

    /// Database failure inside the tool.
    #[error("database error: {0}")]
    Database(#[from] DbError),
}

impl ToolError {
    /// Shorthand for [`ToolError::InvalidArguments`].
    pub fn invalid(tool: &str, message: impl Into<String>) -> Self {
        ToolError::InvalidArguments {
            tool: tool.to_string(),
            message: message.into(),
        }
    }
}

/// A catalogue of executable tools.
#[async_trait]
pub trait ToolProvider: Send + Sync {
    /// Every tool this provider exposes.
    async fn get_tool_definitions(&self) -> Result<Vec<ToolDefinition>, ToolError>;

    /// Run `name`. Unknown names fail with [`ToolError::NotFound`].
    async fn execute_tool(
        &self,
        name: &str,
        arguments: ToolArguments,
        context: &ExecutionContext,
    ) -> Result<ToolOutput, ToolError>;
}

pub(crate) fn required_str<'a>(
    tool: &str,
    arguments: &'a ToolArguments,
    key: &str,
) -> Result<&'a str, ToolError> {
    arguments
        .get(key)
        .and_then(JsonValue::as_str)
        .ok_or_else(|| ToolError::invalid(tool, format!("missing string parameter '{key}'")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn required_params_follow_schema_order() {
        let def = ToolDefinition::new(
            "add_event",
            "Add a calendar event",
            json!({
                "type": "object",
                "properties": {"title": {"type": "string"}, "start": {"type": "string"}},
                "required": ["title", "start"]
            }),
        );
        assert_eq!(def.required_params(), vec!["title", "start"]);
        let bare = ToolDefinition::new("ping", "", json!({"type": "object"}));
        assert!(bare.required_params().is_empty());
    }

    #[test]
    fn structured_output_is_json_encoded() {
        assert_eq!(ToolOutput::from("ok").into_text(), "ok");
        assert_eq!(ToolOutput::from(json!({"a": 1})).into_text(), r#"{"a":1}"#);
        assert_eq!(ToolOutput::from(json!([1, 2])).into_text(), "[1,2]");
        assert_eq!(ToolOutput::from(json!("plain")).into_text(), "plain");
    }
}
