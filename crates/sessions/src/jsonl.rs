//! File-backed durable tier.
//!
//! Layout under the state directory:
//! - `sessions.json`: session index, one JSON object keyed by session id
//! - `<session_id>.jsonl`: append-only message log, one JSON line each
//! - `tool_calls.jsonl`: append-only tool invocation rows

use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use vox_domain::error::{Error, Result};
use vox_domain::message::{Message, Session, SessionStatus};
use vox_domain::tool::{ToolCall, ToolResult};

use crate::repository::{ConversationRepository, ToolCallRepository, ToolCallRow};

pub struct JsonlRepository {
    base_dir: PathBuf,
    index_path: PathBuf,
    index: RwLock<HashMap<String, Session>>,
}

impl JsonlRepository {
    /// Load or create the repository under `state_path/sessions`.
    pub fn new(state_path: &Path) -> Result<Self> {
        let base_dir = state_path.join("sessions");
        std::fs::create_dir_all(&base_dir).map_err(Error::Io)?;

        let index_path = base_dir.join("sessions.json");
        let index = if index_path.exists() {
            let raw = std::fs::read_to_string(&index_path).map_err(Error::Io)?;
            serde_json::from_str(&raw).unwrap_or_default()
        } else {
            HashMap::new()
        };

        tracing::info!(
            sessions = index.len(),
            path = %index_path.display(),
            "durable session repository loaded"
        );

        Ok(Self {
            base_dir,
            index_path,
            index: RwLock::new(index),
        })
    }

    fn message_path(&self, session_id: &str) -> PathBuf {
        self.base_dir.join(format!("{}.jsonl", sanitize(session_id)))
    }

    fn tool_calls_path(&self) -> PathBuf {
        self.base_dir.join("tool_calls.jsonl")
    }

    fn flush_index(&self) -> Result<()> {
        let index = self.index.read();
        let json = serde_json::to_string_pretty(&*index)?;
        std::fs::write(&self.index_path, json).map_err(Error::Io)?;
        Ok(())
    }

    fn append_line(path: &Path, json: &str) -> Result<()> {
        let mut file = std::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .map_err(Error::Io)?;
        file.write_all(json.as_bytes()).map_err(Error::Io)?;
        file.write_all(b"\n").map_err(Error::Io)?;
        Ok(())
    }
}

/// Session ids become file names; keep them path-safe.
fn sanitize(session_id: &str) -> String {
    session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait::async_trait]
impl ConversationRepository for JsonlRepository {
    async fn get_or_create_session(
        &self,
        session_id: &str,
        user_id: Option<&str>,
    ) -> Result<Session> {
        let (session, created) = {
            let mut index = self.index.write();
            match index.get_mut(session_id) {
                Some(existing) => {
                    existing.touch();
                    (existing.clone(), false)
                }
                None => {
                    let session = Session::new(session_id, user_id.map(str::to_string));
                    index.insert(session_id.to_string(), session.clone());
                    (session, true)
                }
            }
        };
        self.flush_index()?;
        if created {
            tracing::debug!(session_id, "durable session row created");
        }
        Ok(session)
    }

    async fn save_message(&self, session_id: &str, message: &Message) -> Result<()> {
        let json = serde_json::to_string(message)?;
        Self::append_line(&self.message_path(session_id), &json)?;

        if let Some(session) = self.index.write().get_mut(session_id) {
            session.touch();
        }
        Ok(())
    }

    async fn load_recent_messages(&self, session_id: &str, limit: usize) -> Result<Vec<Message>> {
        let path = self.message_path(session_id);
        if !path.exists() {
            return Ok(Vec::new());
        }

        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        let mut messages: Vec<Message> = raw
            .lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(msg) => Some(msg),
                Err(e) => {
                    tracing::warn!(session_id, error = %e, "skipping corrupt message line");
                    None
                }
            })
            .collect();

        if messages.len() > limit {
            messages.drain(..messages.len() - limit);
        }
        Ok(messages)
    }

    async fn delete_session(&self, session_id: &str) -> Result<()> {
        let removed = self.index.write().remove(session_id).is_some();
        if removed {
            self.flush_index()?;
        }

        let path = self.message_path(session_id);
        match std::fs::remove_file(&path) {
            Ok(()) => {}
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => return Err(Error::Io(e)),
        }
        Ok(())
    }

    async fn list_user_sessions(
        &self,
        user_id: &str,
        status: Option<SessionStatus>,
    ) -> Result<Vec<Session>> {
        let index = self.index.read();
        let mut sessions: Vec<Session> = index
            .values()
            .filter(|s| s.user_id.as_deref() == Some(user_id))
            .filter(|s| status.map_or(true, |wanted| s.status == wanted))
            .cloned()
            .collect();
        sessions.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        Ok(sessions)
    }

    async fn probe(&self) -> Result<()> {
        // A read of the index file is the lightest meaningful check.
        if self.index_path.exists() {
            std::fs::read_to_string(&self.index_path).map_err(Error::Io)?;
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ToolCallRepository for JsonlRepository {
    async fn record(
        &self,
        session_id: &str,
        call: &ToolCall,
        result: &ToolResult,
        message_id: Option<&str>,
        execution_time_ms: Option<u64>,
    ) -> Result<()> {
        let row = ToolCallRow {
            call_id: call.call_id.clone(),
            session_id: session_id.to_string(),
            message_id: message_id.map(str::to_string),
            tool_name: call.tool_name.clone(),
            parameters: call.arguments.clone(),
            result: serde_json::to_value(result)?,
            execution_time_ms,
            timestamp: call.timestamp,
        };
        Self::append_line(&self.tool_calls_path(), &serde_json::to_string(&row)?)
    }

    async fn list_for_session(&self, session_id: &str) -> Result<Vec<ToolCallRow>> {
        let path = self.tool_calls_path();
        if !path.exists() {
            return Ok(Vec::new());
        }
        let raw = std::fs::read_to_string(&path).map_err(Error::Io)?;
        Ok(raw
            .lines()
            .filter_map(|line| serde_json::from_str::<ToolCallRow>(line).ok())
            .filter(|row| row.session_id == session_id)
            .collect())
    }
}
