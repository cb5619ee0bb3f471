//! Tool invocation records (provider-agnostic).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// An LLM request to invoke a named tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCall {
    pub call_id: String,
    pub tool_name: String,
    /// JSON-serializable argument map.
    pub arguments: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl ToolCall {
    pub fn new(tool_name: impl Into<String>, arguments: serde_json::Value) -> Self {
        Self {
            call_id: format!("call_{}", uuid::Uuid::new_v4().simple()),
            tool_name: tool_name.into(),
            arguments,
            timestamp: Utc::now(),
        }
    }

    pub fn with_id(
        call_id: impl Into<String>,
        tool_name: impl Into<String>,
        arguments: serde_json::Value,
    ) -> Self {
        Self {
            call_id: call_id.into(),
            tool_name: tool_name.into(),
            arguments,
            timestamp: Utc::now(),
        }
    }
}

/// Outcome of a [`ToolCall`].
///
/// Invariants: `success == false` implies `error` is non-empty;
/// `success == true` implies `result` is present. Build through
/// [`ToolResult::ok`] / [`ToolResult::failed`] to keep both.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    pub call_id: String,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ToolResult {
    pub fn ok(call_id: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            call_id: call_id.into(),
            success: true,
            result: Some(result),
            error: None,
            timestamp: Utc::now(),
        }
    }

    pub fn failed(call_id: impl Into<String>, error: impl Into<String>) -> Self {
        let error = error.into();
        debug_assert!(!error.is_empty(), "failed results carry a message");
        Self {
            call_id: call_id.into(),
            success: false,
            result: None,
            error: Some(error),
            timestamp: Utc::now(),
        }
    }

    /// Render the payload (or error) as text suitable for a tool-role
    /// message.
    pub fn content_text(&self) -> String {
        if self.success {
            match &self.result {
                Some(serde_json::Value::String(s)) => s.clone(),
                Some(v) => v.to_string(),
                None => String::new(),
            }
        } else {
            format!("error: {}", self.error.as_deref().unwrap_or("unknown"))
        }
    }
}
