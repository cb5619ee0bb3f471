//! The agent orchestration engine.
//!
//! A turn flows through four nodes (process_input, call_llm,
//! handle_tools, format_response) under conditional routing with a hard
//! tool-iteration cap. The streaming variant forwards deltas as versioned
//! protocol events and honors mid-stream cancellation, persisting partial
//! content with a `[Cancelled]` marker.

pub mod cancel;
pub mod emitter;
pub mod fastpath;
pub mod intent;
pub mod orchestrator;
pub mod prompts;
pub mod state;

pub use cancel::CancelToken;
pub use emitter::EventEmitter;
pub use orchestrator::{Orchestrator, OrchestratorConfig, TurnInput, TurnReport, MAX_TOOL_ITERATIONS};
pub use state::{ErrorState, NextAction, TurnState};
