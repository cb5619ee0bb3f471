//! Conversation records: messages and sessions.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Message
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
    System,
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Assistant => "assistant",
            Role::System => "system",
            Role::Tool => "tool",
        }
    }
}

impl std::str::FromStr for Role {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "assistant" => Ok(Role::Assistant),
            "system" => Ok(Role::System),
            "tool" => Ok(Role::Tool),
            other => Err(crate::error::Error::Validation(format!(
                "unknown message role: {other}"
            ))),
        }
    }
}

/// A single turn-level conversational unit, owned by its session.
///
/// Within a session, timestamps are monotonically non-decreasing in
/// insertion order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
    /// For tool-role messages: the id of the originating tool call.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            id: format!("msg_{}", uuid::Uuid::new_v4().simple()),
            role,
            content: content.into(),
            timestamp: Utc::now(),
            metadata: HashMap::new(),
            tool_call_id: None,
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(Role::System, content)
    }

    /// A tool-role message carrying the output of a tool call.
    pub fn tool(call_id: impl Into<String>, content: impl Into<String>) -> Self {
        let mut msg = Self::new(Role::Tool, content);
        msg.tool_call_id = Some(call_id.into());
        msg
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Session
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    Active,
    Paused,
    Terminated,
}

impl SessionStatus {
    /// Status transitions are monotonic toward `Terminated`, which is
    /// absorbing.
    pub fn can_transition_to(&self, next: SessionStatus) -> bool {
        match self {
            SessionStatus::Terminated => false,
            SessionStatus::Paused => next != SessionStatus::Paused,
            SessionStatus::Active => next != SessionStatus::Active,
        }
    }
}

/// A conversation container.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub status: SessionStatus,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub metadata: HashMap<String, serde_json::Value>,
}

impl Session {
    pub fn new(session_id: impl Into<String>, user_id: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            session_id: session_id.into(),
            user_id,
            status: SessionStatus::Active,
            created_at: now,
            last_activity: now,
            summary: None,
            metadata: HashMap::new(),
        }
    }

    /// Mint a fresh opaque session id.
    pub fn generate_id() -> String {
        format!("sess_{}", uuid::Uuid::new_v4().simple())
    }

    pub fn touch(&mut self) {
        self.last_activity = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_constructors_stamp_role_and_id() {
        let msg = Message::user("hi");
        assert_eq!(msg.role, Role::User);
        assert!(msg.id.starts_with("msg_"));
        assert!(msg.tool_call_id.is_none());

        let tool = Message::tool("call_1", "42");
        assert_eq!(tool.role, Role::Tool);
        assert_eq!(tool.tool_call_id.as_deref(), Some("call_1"));
    }

    #[test]
    fn role_round_trips_through_str() {
        for role in [Role::User, Role::Assistant, Role::System, Role::Tool] {
            assert_eq!(role.as_str().parse::<Role>().unwrap(), role);
        }
        assert!("narrator".parse::<Role>().is_err());
    }

    #[test]
    fn terminated_is_absorbing() {
        assert!(!SessionStatus::Terminated.can_transition_to(SessionStatus::Active));
        assert!(!SessionStatus::Terminated.can_transition_to(SessionStatus::Paused));
        assert!(SessionStatus::Active.can_transition_to(SessionStatus::Terminated));
        assert!(SessionStatus::Paused.can_transition_to(SessionStatus::Terminated));
    }

    #[test]
    fn session_last_activity_never_precedes_creation() {
        let mut session = Session::new("s1", None);
        assert!(session.last_activity >= session.created_at);
        session.touch();
        assert!(session.last_activity >= session.created_at);
    }
}
