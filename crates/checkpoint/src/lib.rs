//! Orchestrator state snapshots.
//!
//! A checkpoint is an opaque serialized blob plus a metadata map, keyed by
//! `(thread_id, checkpoint_id)`. The most recent checkpoint for a thread
//! is authoritative for resume. When no durable backend is configured (or
//! it is unreachable at startup) the in-memory implementation is used and
//! state survives only within the process.

pub mod file;
pub mod memory;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use vox_domain::error::Result;

pub use file::FileCheckpointer;
pub use memory::MemoryCheckpointer;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Checkpoint record
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Checkpoint {
    pub thread_id: String,
    /// `<unix-millis>-<step:04>`: lexical order matches creation order
    /// within a thread.
    pub checkpoint_id: String,
    /// Opaque serialized state; the producer owns the format.
    pub state: String,
    pub metadata: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Checkpoint {
    pub fn new(
        thread_id: impl Into<String>,
        step: u32,
        state: String,
        metadata: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            thread_id: thread_id.into(),
            checkpoint_id: format!("{}-{step:04}", now.timestamp_millis()),
            state,
            metadata,
            created_at: now,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Trait
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[async_trait::async_trait]
pub trait Checkpointer: Send + Sync {
    /// Latest snapshot for a thread.
    async fn get(&self, thread_id: &str) -> Result<Option<Checkpoint>>;

    /// Latest snapshot plus its metadata.
    async fn get_tuple(&self, thread_id: &str)
        -> Result<Option<(Checkpoint, serde_json::Value)>>;

    /// Store a snapshot; returns the minted checkpoint id.
    async fn put(
        &self,
        thread_id: &str,
        step: u32,
        state: String,
        metadata: serde_json::Value,
    ) -> Result<String>;

    /// Checkpoints for a thread, newest first. `before` filters to ids
    /// strictly older than the given one.
    async fn list(
        &self,
        thread_id: &str,
        limit: Option<usize>,
        before: Option<&str>,
    ) -> Result<Vec<Checkpoint>>;

    /// Drop all checkpoints for a thread.
    async fn delete(&self, thread_id: &str) -> Result<()>;
}
