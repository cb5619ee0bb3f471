//! Shared domain types for the VoxAgent workspace.
//!
//! Everything here is provider- and transport-agnostic: the error enum,
//! conversation records, tool calls and results, stream events, the
//! versioned wire event protocol, and configuration.

pub mod config;
pub mod error;
pub mod event;
pub mod message;
pub mod rag;
pub mod stream;
pub mod tool;

pub use error::{Error, Result};
pub use message::{Message, Role, Session, SessionStatus};
pub use tool::{ToolCall, ToolResult};
