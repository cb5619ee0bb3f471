//! AppState construction.
//!
//! Startup order: config → session store → tool registry → LLM client →
//! orchestrator → transport glue. Every subsystem logs what it wired.

use std::sync::Arc;
use std::time::Duration;

use vox_agent::{Orchestrator, OrchestratorConfig};
use vox_checkpoint::{Checkpointer, FileCheckpointer, MemoryCheckpointer};
use vox_domain::config::Config;
use vox_llm::OpenAiCompatClient;
use vox_sessions::{ConversationRepository, HybridSessionStore, JsonlRepository, ToolCallRepository};
use vox_tools::builtin::{CalculatorTool, TimeTool, WeatherTool};
use vox_tools::{ToolExecutor, ToolRegistry};

use crate::api::auth;
use crate::runtime::{ConversationService, StreamTaskManager};
use crate::state::AppState;

/// Validate config, initialize every subsystem, and return a fully wired
/// [`AppState`].
pub async fn build_app_state(config: Arc<Config>) -> anyhow::Result<AppState> {
    // ── Config validation ────────────────────────────────────────
    let issues = config.validate();
    for issue in &issues {
        tracing::error!("config: {issue}");
    }
    if !issues.is_empty() {
        anyhow::bail!("config validation failed with {} issue(s)", issues.len());
    }

    // ── Session store (memory tier + optional durable tier) ──────
    let repo: Option<Arc<JsonlRepository>> = if config.sessions.database_enabled {
        match JsonlRepository::new(&config.sessions.state_path) {
            Ok(repo) => Some(Arc::new(repo)),
            Err(e) => {
                tracing::warn!(error = %e, "durable tier unavailable, running memory-only");
                None
            }
        }
    } else {
        tracing::info!("durable tier disabled by config");
        None
    };

    let store = Arc::new(match &repo {
        Some(repo) => HybridSessionStore::new(
            repo.clone() as Arc<dyn ConversationRepository>,
            config.sessions.memory_limit,
            config.sessions.ttl_hours,
        ),
        None => HybridSessionStore::memory_only(
            config.sessions.memory_limit,
            config.sessions.ttl_hours,
        ),
    });
    let tool_repo = repo
        .clone()
        .map(|repo| repo as Arc<dyn ToolCallRepository>);

    // ── Tool registry + executor ─────────────────────────────────
    let registry = Arc::new(ToolRegistry::new());
    for tool in [
        Arc::new(CalculatorTool) as Arc<dyn vox_tools::Tool>,
        Arc::new(TimeTool),
        Arc::new(WeatherTool),
    ] {
        if let Err(e) = registry.register(tool) {
            tracing::warn!(error = %e, "built-in tool registration failed");
        }
    }
    let executor = Arc::new(ToolExecutor::new(
        registry.clone(),
        config.tools.cache_capacity,
        Duration::from_secs(config.tools.cache_ttl_secs),
        Duration::from_secs(config.tools.timeout_secs),
    ));
    tracing::info!(tools = registry.len(), "tool registry ready");

    // ── LLM client ───────────────────────────────────────────────
    let api_key = std::env::var(&config.llm.api_key_env).unwrap_or_default();
    if api_key.is_empty() {
        tracing::warn!(
            env = %config.llm.api_key_env,
            "no LLM API key configured; upstream calls will be rejected"
        );
    }
    let llm = Arc::new(
        OpenAiCompatClient::new(
            &config.llm.base_url,
            &api_key,
            Duration::from_secs(config.llm.request_timeout_secs),
        )?
        .with_transient_retry(config.llm.retry_transient),
    );
    tracing::info!(base_url = %config.llm.base_url, model = %config.llm.models.default, "LLM client ready");

    // ── Checkpointer (file-backed, in-memory fallback) ───────────
    let checkpointer: Arc<dyn Checkpointer> =
        match FileCheckpointer::new(&config.sessions.state_path) {
            Ok(cp) => Arc::new(cp),
            Err(e) => {
                tracing::warn!(error = %e, "file checkpointer unavailable, using in-memory");
                Arc::new(MemoryCheckpointer::new())
            }
        };

    // ── Orchestrator ─────────────────────────────────────────────
    let orchestrator = Arc::new(Orchestrator::new(
        llm,
        executor.clone(),
        store.clone(),
        checkpointer,
        tool_repo,
        OrchestratorConfig {
            model: config.llm.models.default.clone(),
            temperature: config.llm.temperature,
            max_tokens: config.llm.max_tokens,
            history_window: config.sessions.history_window,
        },
    ));

    // ── Conversation façade ──────────────────────────────────────
    // STT/TTS collaborators are deployment-specific; deployments wire
    // their adapters here. Without them the audio routes return 400.
    let conversation = Arc::new(ConversationService::new(
        orchestrator.clone(),
        None,
        None,
        config.voice.clone(),
    ));

    // ── Transport glue ───────────────────────────────────────────
    let streams = Arc::new(StreamTaskManager::new());
    let api_key_hashes = Arc::new(auth::load_key_hashes(&config.server.api_keys_env));
    if api_key_hashes.is_empty() {
        tracing::warn!("no inbound API keys configured; running in dev mode");
    }

    Ok(AppState {
        config,
        orchestrator,
        store,
        registry,
        executor,
        streams,
        conversation,
        api_key_hashes,
    })
}
