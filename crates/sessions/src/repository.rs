//! Durable-tier repository contracts.
//!
//! The core defines these interfaces; the backing store (SQL, files,
//! whatever) lives behind them. Schema migrations and SQL dialect are
//! explicitly someone else's problem.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vox_domain::error::Result;
use vox_domain::message::{Message, Session, SessionStatus};
use vox_domain::tool::{ToolCall, ToolResult};

/// Durable conversation storage.
#[async_trait::async_trait]
pub trait ConversationRepository: Send + Sync {
    /// Fetch the session row, creating it when absent.
    async fn get_or_create_session(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<Session>;

    async fn save_message(&self, session_id: &str, message: &Message) -> Result<()>;

    /// The most recent `limit` messages, oldest first.
    async fn load_recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>>;

    /// Remove the session and its messages. Missing sessions are a
    /// non-error.
    async fn delete_session(&self, session_id: &str) -> Result<()>;

    async fn list_user_sessions(
        &self,
        user_id: &str,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>>;

    /// Light read used by `reset_fallback` to test whether the backing
    /// store has recovered.
    async fn probe(&self) -> Result<()>;
}

/// One persisted tool invocation row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCallRow {
    pub call_id: String,
    pub session_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    pub tool_name: String,
    pub parameters: serde_json::Value,
    pub result: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_time_ms: Option<u64>,
    pub timestamp: DateTime<Utc>,
}

/// Optional dedicated persistence for tool invocations. When no
/// implementation is wired in, tool activity lives only in assistant
/// message metadata.
#[async_trait::async_trait]
pub trait ToolCallRepository: Send + Sync {
    async fn record(
        &self,
        session_id: &str,
        call: &ToolCall,
        result: &ToolResult,
        message_id: Option<&str>,
        execution_time_ms: Option<u64>,
    ) -> Result<()>;

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<ToolCallRow>>;
}
