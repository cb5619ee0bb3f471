//! Per-turn state threaded through the orchestrator nodes, and its
//! versioned snapshot codec.

use serde::{Deserialize, Serialize};

use vox_domain::error::{Error, Result};
use vox_domain::message::Message;
use vox_domain::tool::{ToolCall, ToolResult};

/// Where the router sends the turn next.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NextAction {
    CallLlm,
    HandleTools,
    FormatResponse,
}

/// Tagged error condition recorded by a node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ErrorState {
    EmptyInput,
    LlmFailure { message: String },
    ToolFailure { message: String },
    Internal { message: String },
}

impl ErrorState {
    pub fn tag(&self) -> &'static str {
        match self {
            ErrorState::EmptyInput => "empty_input",
            ErrorState::LlmFailure { .. } => "llm_failure",
            ErrorState::ToolFailure { .. } => "tool_failure",
            ErrorState::Internal { .. } => "internal",
        }
    }
}

/// The in-memory record for one turn's orchestration. Discarded after
/// format_response (or error); snapshots go through the checkpointer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnState {
    // Session binding
    pub session_id: String,
    pub user_id: Option<String>,

    // Core conversation data
    pub user_input: String,
    pub agent_response: String,
    /// Turn-local messages (user, tool results, assistant).
    pub messages: Vec<Message>,

    // Tool interaction
    pub pending_tool_calls: Vec<ToolCall>,
    pub executed_tool_calls: Vec<ToolCall>,
    pub tool_results: Vec<ToolResult>,
    pub tool_iteration_count: u32,
    pub tool_limit_reached: bool,

    // Processing context
    pub current_intent: Option<String>,

    // Flow control
    pub next_action: Option<NextAction>,
    pub should_continue: bool,
    pub error_state: Option<ErrorState>,

    // Model parameters
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

impl TurnState {
    pub fn new(
        session_id: impl Into<String>,
        user_id: Option<String>,
        user_input: impl Into<String>,
        model: impl Into<String>,
        temperature: f32,
        max_tokens: u32,
    ) -> Self {
        Self {
            session_id: session_id.into(),
            user_id,
            user_input: user_input.into(),
            agent_response: String::new(),
            messages: Vec::new(),
            pending_tool_calls: Vec::new(),
            executed_tool_calls: Vec::new(),
            tool_results: Vec::new(),
            tool_iteration_count: 0,
            tool_limit_reached: false,
            current_intent: None,
            next_action: None,
            should_continue: true,
            error_state: None,
            model: model.into(),
            temperature,
            max_tokens,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Snapshot codec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Bumped on any incompatible change to [`TurnState`]'s serialized form.
pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct SnapshotEnvelope {
    v: u32,
    state: TurnState,
}

/// Serialize a state snapshot for the checkpointer.
pub fn encode_snapshot(state: &TurnState) -> Result<String> {
    let envelope = SnapshotEnvelope {
        v: SNAPSHOT_VERSION,
        state: state.clone(),
    };
    Ok(serde_json::to_string(&envelope)?)
}

/// Decode a snapshot. Unknown versions are a hard error, never a guess.
pub fn decode_snapshot(raw: &str) -> Result<TurnState> {
    let envelope: SnapshotEnvelope = serde_json::from_str(raw)?;
    if envelope.v != SNAPSHOT_VERSION {
        return Err(Error::Validation(format!(
            "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
            envelope.v
        )));
    }
    Ok(envelope.state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn populated_state() -> TurnState {
        let mut state = TurnState::new("s1", Some("u1".into()), "what is 7*6", "gpt-4", 0.7, 1500);
        state.messages.push(Message::user("what is 7*6"));
        let call = ToolCall::new("calculator", serde_json::json!({"expression": "7*6"}));
        state
            .tool_results
            .push(ToolResult::ok(&call.call_id, serde_json::json!("42")));
        state.executed_tool_calls.push(call);
        state.tool_iteration_count = 1;
        state.current_intent = Some("calculation".into());
        state.next_action = Some(NextAction::FormatResponse);
        state.agent_response = "7*6 is 42".into();
        state
    }

    #[test]
    fn snapshot_round_trips_exactly() {
        let state = populated_state();
        let encoded = encode_snapshot(&state).unwrap();
        let decoded = decode_snapshot(&encoded).unwrap();
        assert_eq!(decoded, state);
    }

    #[test]
    fn snapshot_rejects_unknown_version() {
        let state = populated_state();
        let encoded = encode_snapshot(&state).unwrap();
        let bumped = encoded.replacen("\"v\":1", "\"v\":99", 1);
        assert!(decode_snapshot(&bumped).is_err());
    }

    #[test]
    fn snapshot_rejects_garbage() {
        assert!(decode_snapshot("not json").is_err());
        assert!(decode_snapshot("{}").is_err());
    }

    #[test]
    fn fresh_state_defaults() {
        let state = TurnState::new("s1", None, "hi", "gpt-4", 0.7, 1500);
        assert!(state.should_continue);
        assert!(state.next_action.is_none());
        assert_eq!(state.tool_iteration_count, 0);
        assert!(!state.tool_limit_reached);
    }
}
