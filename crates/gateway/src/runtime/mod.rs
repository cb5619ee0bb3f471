//! Gateway runtime: per-session stream tracking and the conversation
//! façade.

pub mod conversation;
pub mod stream_tasks;

pub use conversation::{ConversationService, InputMode, OutputMode, TurnEnvelope};
pub use stream_tasks::StreamTaskManager;
