//! Conversation history: a two-tier hybrid store.
//!
//! The memory tier is a bounded per-session ring for hot reads; the
//! durable tier is whatever implements [`ConversationRepository`]. Any
//! durable failure flips the store into sticky fallback mode where it
//! serves from memory alone until an operator probe succeeds.

pub mod hybrid;
pub mod jsonl;
pub mod repository;

pub use hybrid::{HybridSessionStore, StoreStats};
pub use jsonl::JsonlRepository;
pub use repository::{ConversationRepository, ToolCallRepository, ToolCallRow};
