//! OpenAI-compatible chat-completion client.
//!
//! Works against OpenAI, Azure-style gateways, Ollama, vLLM, and any other
//! endpoint following the chat-completions contract. Parameter differences
//! between model families are absorbed by [`compat`]; callers never see
//! them.

pub mod client;
pub mod compat;
pub mod sse;

pub use client::{
    ChatOutcome, ChatRequest, LlmClient, OpenAiCompatClient, ToolChoice, TOOL_CALLS_METADATA_KEY,
};
