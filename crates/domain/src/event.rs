//! Versioned wire event protocol shared by the SSE and WebSocket
//! transports.
//!
//! Every event serializes to a flat JSON object:
//!
//! ```json
//! {
//!   "version": "1.0",
//!   "id": "evt_<16-hex>",
//!   "timestamp": "2025-10-14T10:30:00.123Z",
//!   "type": "delta",
//!   "session_id": "sess_abc",
//!   "content": "Hello"
//! }
//! ```
//!
//! Receivers MUST ignore unknown fields; additive changes bump the minor
//! version, semantic changes bump the major version.

use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;

/// Current event protocol version.
pub const EVENT_PROTOCOL_VERSION: &str = "1.0";

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Envelope
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A single protocol event: common envelope fields plus a type-tagged
/// payload flattened into the same object.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Event {
    pub version: String,
    /// Unique within a session, prefixed `evt_`.
    pub id: String,
    /// ISO-8601 UTC with trailing `Z`; non-decreasing within a stream.
    pub timestamp: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(flatten)]
    pub payload: EventPayload,
}

impl Event {
    /// True for the events that terminate a transport stream.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self.payload,
            EventPayload::End { .. } | EventPayload::Error { .. } | EventPayload::Cancelled { .. }
        )
    }

    pub fn type_name(&self) -> &'static str {
        self.payload.type_name()
    }

    /// Whether the envelope conforms to the protocol: an `evt_`-prefixed
    /// id, a non-empty version, and a parseable RFC 3339 timestamp.
    pub fn conforms(&self) -> bool {
        self.id.starts_with("evt_")
            && !self.version.is_empty()
            && chrono::DateTime::parse_from_rfc3339(&self.timestamp).is_ok()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Payloads
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Trace event level: `graph` for scheduling-level events, `node` for
/// execution-level events. Trace events are advisory; clients may ignore
/// them entirely without loss of correctness.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TraceLevel {
    Graph,
    Node,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventPayload {
    // ── Transport events ─────────────────────────────────────────
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        model: Option<String>,
    },
    Delta {
        content: String,
    },
    End {
        /// The full aggregated response.
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },
    Error {
        error: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error_code: Option<String>,
    },
    ToolCalls {
        tool_calls: Vec<WireToolCall>,
    },
    Cancelled {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        reason: Option<String>,
    },

    // ── Trace events (advisory) ──────────────────────────────────
    WorkflowStarted { level: TraceLevel, data: serde_json::Value },
    NodeStarted { level: TraceLevel, data: serde_json::Value },
    NodeFinished { level: TraceLevel, data: serde_json::Value },
    RouteDecision { level: TraceLevel, data: serde_json::Value },
    WorkflowComplete { level: TraceLevel, data: serde_json::Value },
    ThinkingPhase { level: TraceLevel, data: serde_json::Value },
    ToolCallPending { level: TraceLevel, data: serde_json::Value },
    ToolExecuting { level: TraceLevel, data: serde_json::Value },
    ToolResult { level: TraceLevel, data: serde_json::Value },
    LlmStreaming { level: TraceLevel, data: serde_json::Value },
    TokenUsage { level: TraceLevel, data: serde_json::Value },
}

impl EventPayload {
    pub fn type_name(&self) -> &'static str {
        match self {
            EventPayload::Start { .. } => "start",
            EventPayload::Delta { .. } => "delta",
            EventPayload::End { .. } => "end",
            EventPayload::Error { .. } => "error",
            EventPayload::ToolCalls { .. } => "tool_calls",
            EventPayload::Cancelled { .. } => "cancelled",
            EventPayload::WorkflowStarted { .. } => "workflow_started",
            EventPayload::NodeStarted { .. } => "node_started",
            EventPayload::NodeFinished { .. } => "node_finished",
            EventPayload::RouteDecision { .. } => "route_decision",
            EventPayload::WorkflowComplete { .. } => "workflow_complete",
            EventPayload::ThinkingPhase { .. } => "thinking_phase",
            EventPayload::ToolCallPending { .. } => "tool_call_pending",
            EventPayload::ToolExecuting { .. } => "tool_executing",
            EventPayload::ToolResult { .. } => "tool_result",
            EventPayload::LlmStreaming { .. } => "llm_streaming",
            EventPayload::TokenUsage { .. } => "token_usage",
        }
    }

    /// Whether this is an advisory trace event.
    pub fn is_trace(&self) -> bool {
        !matches!(
            self,
            EventPayload::Start { .. }
                | EventPayload::Delta { .. }
                | EventPayload::End { .. }
                | EventPayload::Error { .. }
                | EventPayload::ToolCalls { .. }
                | EventPayload::Cancelled { .. }
        )
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Wire tool-call shape
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// The OpenAI function-calling wire shape used inside `tool_calls` events.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireToolCall {
    pub id: String,
    #[serde(rename = "type")]
    pub kind: String,
    pub function: WireFunction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WireFunction {
    pub name: String,
    /// Arguments as a JSON-encoded string, mirroring the upstream wire
    /// format.
    pub arguments: String,
}

impl From<&ToolCall> for WireToolCall {
    fn from(call: &ToolCall) -> Self {
        Self {
            id: call.call_id.clone(),
            kind: "function".into(),
            function: WireFunction {
                name: call.tool_name.clone(),
                arguments: call.arguments.to_string(),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(payload: EventPayload) -> Event {
        Event {
            version: EVENT_PROTOCOL_VERSION.into(),
            id: "evt_0123456789abcdef".into(),
            timestamp: "2025-10-14T10:30:00.123Z".into(),
            session_id: Some("sess_1".into()),
            payload,
        }
    }

    #[test]
    fn delta_serializes_flat() {
        let e = event(EventPayload::Delta { content: "Hi".into() });
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["version"], "1.0");
        assert_eq!(v["type"], "delta");
        assert_eq!(v["content"], "Hi");
        assert_eq!(v["session_id"], "sess_1");
        assert!(v["id"].as_str().unwrap().starts_with("evt_"));
    }

    #[test]
    fn tool_calls_use_openai_wire_shape() {
        let call = ToolCall::with_id("c1", "calculator", serde_json::json!({"expression": "7*6"}));
        let e = event(EventPayload::ToolCalls {
            tool_calls: vec![WireToolCall::from(&call)],
        });
        let v = serde_json::to_value(&e).unwrap();
        let tc = &v["tool_calls"][0];
        assert_eq!(tc["id"], "c1");
        assert_eq!(tc["type"], "function");
        assert_eq!(tc["function"]["name"], "calculator");
        // Arguments travel as a JSON-encoded string.
        let args: serde_json::Value =
            serde_json::from_str(tc["function"]["arguments"].as_str().unwrap()).unwrap();
        assert_eq!(args["expression"], "7*6");
    }

    #[test]
    fn terminal_events() {
        assert!(event(EventPayload::End { content: "x".into(), metadata: None }).is_terminal());
        assert!(event(EventPayload::Error { error: "x".into(), error_code: None }).is_terminal());
        assert!(event(EventPayload::Cancelled { reason: None }).is_terminal());
        assert!(!event(EventPayload::Delta { content: "x".into() }).is_terminal());
    }

    #[test]
    fn unknown_fields_are_ignored_on_deserialize() {
        let raw = r#"{
            "version": "1.1",
            "id": "evt_feedfacefeedface",
            "timestamp": "2025-10-14T10:30:00Z",
            "type": "delta",
            "content": "ok",
            "some_future_field": {"nested": true}
        }"#;
        let e: Event = serde_json::from_str(raw).unwrap();
        assert_eq!(e.type_name(), "delta");
        assert_eq!(e.version, "1.1");
    }

    #[test]
    fn conforms_checks_envelope_shape() {
        let good = event(EventPayload::Delta { content: "x".into() });
        assert!(good.conforms());

        let mut bad_id = good.clone();
        bad_id.id = "event-1".into();
        assert!(!bad_id.conforms());

        let mut bad_ts = good.clone();
        bad_ts.timestamp = "yesterday".into();
        assert!(!bad_ts.conforms());
    }

    #[test]
    fn trace_events_carry_level_and_data() {
        let e = event(EventPayload::NodeStarted {
            level: TraceLevel::Graph,
            data: serde_json::json!({"node": "call_llm", "timestamp": 12.5}),
        });
        let v = serde_json::to_value(&e).unwrap();
        assert_eq!(v["type"], "node_started");
        assert_eq!(v["level"], "graph");
        assert_eq!(v["data"]["node"], "call_llm");
        assert!(e.payload.is_trace());
    }
}
