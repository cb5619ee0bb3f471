use std::pin::Pin;

use serde::{Deserialize, Serialize};

use crate::tool::ToolCall;

/// A boxed async stream, used for LLM streaming responses and audio
/// synthesis output.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events yielded while streaming a chat completion (provider-agnostic).
///
/// Tool-call fragments are assembled inside the LLM client; consumers only
/// ever see one consolidated [`StreamEvent::ToolCalls`], emitted when the
/// upstream stream terminates naturally.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StreamEvent {
    /// A text token chunk.
    Token { text: String },

    /// All tool calls the model committed to during this stream.
    ToolCalls { calls: Vec<ToolCall> },

    /// Stream finished.
    Done {
        usage: Option<Usage>,
        finish_reason: Option<String>,
    },
}

/// Token usage for a completion.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl Usage {
    pub fn accumulate(&mut self, other: &Usage) {
        self.prompt_tokens += other.prompt_tokens;
        self.completion_tokens += other.completion_tokens;
        self.total_tokens += other.total_tokens;
    }
}
