//! Event factory bound to one turn's stream.
//!
//! Owns the protocol envelope: unique `evt_` ids, UTC timestamps clamped
//! to be non-decreasing, the session binding, and the relative-millisecond
//! offsets trace events carry.

use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::json;

use vox_domain::error::Error;
use vox_domain::event::{Event, EventPayload, TraceLevel, WireToolCall, EVENT_PROTOCOL_VERSION};
use vox_domain::stream::Usage;
use vox_domain::tool::ToolCall;

pub struct EventEmitter {
    session_id: Option<String>,
    started: Instant,
    last_timestamp: Mutex<DateTime<Utc>>,
}

impl EventEmitter {
    pub fn new(session_id: Option<String>) -> Self {
        Self {
            session_id,
            started: Instant::now(),
            last_timestamp: Mutex::new(Utc::now()),
        }
    }

    /// Milliseconds since the emitter was created.
    pub fn offset_ms(&self) -> f64 {
        self.started.elapsed().as_secs_f64() * 1000.0
    }

    fn envelope(&self, payload: EventPayload) -> Event {
        // Clamp so timestamps never decrease within a stream, even if the
        // wall clock steps backwards.
        let now = {
            let mut last = self.last_timestamp.lock();
            let now = Utc::now().max(*last);
            *last = now;
            now
        };

        Event {
            version: EVENT_PROTOCOL_VERSION.into(),
            id: format!("evt_{}", &uuid::Uuid::new_v4().simple().to_string()[..16]),
            timestamp: now.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
            session_id: self.session_id.clone(),
            payload,
        }
    }

    // ── Transport events ───────────────────────────────────────────

    pub fn start(&self, model: Option<String>) -> Event {
        self.envelope(EventPayload::Start { model })
    }

    pub fn delta(&self, content: impl Into<String>) -> Event {
        self.envelope(EventPayload::Delta { content: content.into() })
    }

    pub fn end(&self, content: impl Into<String>, metadata: Option<serde_json::Value>) -> Event {
        self.envelope(EventPayload::End { content: content.into(), metadata })
    }

    pub fn error(&self, error: &Error) -> Event {
        self.envelope(EventPayload::Error {
            error: error.to_string(),
            error_code: Some(error.error_code().into()),
        })
    }

    pub fn error_message(&self, message: impl Into<String>, code: Option<String>) -> Event {
        self.envelope(EventPayload::Error {
            error: message.into(),
            error_code: code,
        })
    }

    pub fn tool_calls(&self, calls: &[ToolCall]) -> Event {
        self.envelope(EventPayload::ToolCalls {
            tool_calls: calls.iter().map(WireToolCall::from).collect(),
        })
    }

    pub fn cancelled(&self, reason: Option<String>) -> Event {
        self.envelope(EventPayload::Cancelled { reason })
    }

    // ── Graph-level trace events ───────────────────────────────────

    pub fn workflow_started(&self, user_input: &str) -> Event {
        let preview: String = user_input.chars().take(100).collect();
        self.envelope(EventPayload::WorkflowStarted {
            level: TraceLevel::Graph,
            data: json!({ "user_input": preview, "timestamp": self.offset_ms() }),
        })
    }

    pub fn node_started(&self, node: &str) -> Event {
        self.envelope(EventPayload::NodeStarted {
            level: TraceLevel::Graph,
            data: json!({ "node": node, "timestamp": self.offset_ms() }),
        })
    }

    pub fn node_finished(&self, node: &str, duration_ms: f64) -> Event {
        self.envelope(EventPayload::NodeFinished {
            level: TraceLevel::Graph,
            data: json!({
                "node": node,
                "duration_ms": (duration_ms * 100.0).round() / 100.0,
                "timestamp": self.offset_ms(),
            }),
        })
    }

    pub fn route_decision(&self, from: &str, to: &str, reason: &str) -> Event {
        self.envelope(EventPayload::RouteDecision {
            level: TraceLevel::Graph,
            data: json!({ "from": from, "to": to, "reason": reason, "timestamp": self.offset_ms() }),
        })
    }

    pub fn workflow_complete(&self, total_ms: f64) -> Event {
        self.envelope(EventPayload::WorkflowComplete {
            level: TraceLevel::Graph,
            data: json!({
                "total_duration_ms": (total_ms * 100.0).round() / 100.0,
                "timestamp": self.offset_ms(),
            }),
        })
    }

    // ── Node-level trace events ────────────────────────────────────

    pub fn thinking_phase(&self, phase: &str, node: &str) -> Event {
        self.envelope(EventPayload::ThinkingPhase {
            level: TraceLevel::Node,
            data: json!({ "phase": phase, "node": node, "timestamp": self.offset_ms() }),
        })
    }

    pub fn tool_call_pending(&self, call: &ToolCall) -> Event {
        self.envelope(EventPayload::ToolCallPending {
            level: TraceLevel::Node,
            data: json!({
                "tool": call.tool_name,
                "args": call.arguments,
                "timestamp": self.offset_ms(),
            }),
        })
    }

    pub fn tool_executing(&self, tool_name: &str) -> Event {
        self.envelope(EventPayload::ToolExecuting {
            level: TraceLevel::Node,
            data: json!({ "tool": tool_name, "timestamp": self.offset_ms() }),
        })
    }

    pub fn tool_result(
        &self,
        tool_name: &str,
        success: bool,
        summary: &str,
        duration_ms: Option<f64>,
    ) -> Event {
        let summary: String = summary.chars().take(200).collect();
        self.envelope(EventPayload::ToolResult {
            level: TraceLevel::Node,
            data: json!({
                "tool": tool_name,
                "success": success,
                "summary": summary,
                "duration_ms": duration_ms,
                "timestamp": self.offset_ms(),
            }),
        })
    }

    pub fn llm_streaming(&self, phase: &str) -> Event {
        self.envelope(EventPayload::LlmStreaming {
            level: TraceLevel::Node,
            data: json!({ "phase": phase, "timestamp": self.offset_ms() }),
        })
    }

    pub fn token_usage(&self, usage: &Usage) -> Event {
        self.envelope(EventPayload::TokenUsage {
            level: TraceLevel::Node,
            data: json!({
                "prompt_tokens": usage.prompt_tokens,
                "completion_tokens": usage.completion_tokens,
                "total_tokens": usage.total_tokens,
                "timestamp": self.offset_ms(),
            }),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn ids_are_unique_and_prefixed() {
        let emitter = EventEmitter::new(Some("s1".into()));
        let mut seen = HashSet::new();
        for _ in 0..200 {
            let event = emitter.delta("x");
            assert!(event.id.starts_with("evt_"));
            assert_eq!(event.id.len(), 4 + 16);
            assert!(seen.insert(event.id));
        }
    }

    #[test]
    fn timestamps_are_non_decreasing() {
        let emitter = EventEmitter::new(None);
        let mut prev = String::new();
        for _ in 0..100 {
            let event = emitter.delta("x");
            assert!(event.timestamp >= prev, "{} < {prev}", event.timestamp);
            prev = event.timestamp;
        }
    }

    #[test]
    fn timestamps_carry_utc_z_suffix() {
        let emitter = EventEmitter::new(None);
        let event = emitter.start(Some("gpt-4".into()));
        assert!(event.timestamp.ends_with('Z'));
        assert!(event.timestamp.contains('T'));
    }

    #[test]
    fn session_id_binds_every_event() {
        let emitter = EventEmitter::new(Some("sess_42".into()));
        for event in [
            emitter.start(None),
            emitter.delta("x"),
            emitter.end("x", None),
            emitter.node_started("call_llm"),
        ] {
            assert_eq!(event.session_id.as_deref(), Some("sess_42"));
        }
    }

    #[test]
    fn trace_offsets_increase() {
        let emitter = EventEmitter::new(None);
        let first = emitter.node_started("process_input");
        std::thread::sleep(std::time::Duration::from_millis(5));
        let second = emitter.node_started("call_llm");
        let t1 = match &first.payload {
            EventPayload::NodeStarted { data, .. } => data["timestamp"].as_f64().unwrap(),
            _ => unreachable!(),
        };
        let t2 = match &second.payload {
            EventPayload::NodeStarted { data, .. } => data["timestamp"].as_f64().unwrap(),
            _ => unreachable!(),
        };
        assert!(t2 > t1);
    }

    #[test]
    fn error_event_carries_code() {
        let emitter = EventEmitter::new(None);
        let event = emitter.error(&Error::Validation("bad".into()));
        match event.payload {
            EventPayload::Error { error_code, .. } => {
                assert_eq!(error_code.as_deref(), Some("VALIDATION"));
            }
            _ => unreachable!(),
        }
    }
}
