//! Shared application state threaded into every handler.

use std::sync::Arc;

use vox_agent::Orchestrator;
use vox_domain::config::Config;
use vox_sessions::HybridSessionStore;
use vox_tools::{ToolExecutor, ToolRegistry};

use crate::runtime::{ConversationService, StreamTaskManager};

/// Everything the API surface needs, wired once at startup.
///
/// Construction order (see [`crate::bootstrap`]): config → session store →
/// tool registry → LLM client → orchestrator → transport.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,

    // ── Core services ────────────────────────────────────────────
    pub orchestrator: Arc<Orchestrator>,
    pub store: Arc<HybridSessionStore>,
    pub registry: Arc<ToolRegistry>,
    pub executor: Arc<ToolExecutor>,

    // ── Runtime ──────────────────────────────────────────────────
    pub streams: Arc<StreamTaskManager>,
    pub conversation: Arc<ConversationService>,

    // ── Security (startup-computed) ──────────────────────────────
    /// SHA-256 digests of the accepted inbound API keys. Empty ⇒ dev
    /// mode, no auth enforced.
    pub api_key_hashes: Arc<Vec<[u8; 32]>>,
}
