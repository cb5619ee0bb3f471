//! Configuration structures.
//!
//! Deserialized from `config.toml`; every section has serde defaults so a
//! missing file yields a runnable dev configuration. Secrets (LLM API key,
//! inbound API keys) are named by env var and read once at startup.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Top-level config
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub llm: LlmConfig,
    #[serde(default)]
    pub sessions: SessionsConfig,
    #[serde(default)]
    pub tools: ToolsConfig,
    #[serde(default)]
    pub voice: VoiceConfig,
}

impl Config {
    /// Parse a TOML config string.
    pub fn from_toml(raw: &str) -> Result<Self> {
        toml::from_str(raw).map_err(|e| Error::Config(format!("parsing config: {e}")))
    }

    /// Sanity-check values that serde defaults cannot express.
    pub fn validate(&self) -> Vec<String> {
        let mut issues = Vec::new();
        if self.llm.base_url.is_empty() {
            issues.push("llm.base_url is empty".into());
        }
        if self.llm.models.default.is_empty() {
            issues.push("llm.models.default is empty".into());
        }
        if self.sessions.memory_limit == 0 {
            issues.push("sessions.memory_limit must be at least 1".into());
        }
        if !(0.0..=2.0).contains(&self.llm.temperature) {
            issues.push(format!(
                "llm.temperature {} outside [0.0, 2.0]",
                self.llm.temperature
            ));
        }
        issues
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Server
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "d_host")]
    pub host: String,
    #[serde(default = "d_port")]
    pub port: u16,
    /// Env var naming the comma-separated inbound API key list.
    /// Unset or empty ⇒ dev mode (no auth).
    #[serde(default = "d_api_keys_env")]
    pub api_keys_env: String,
    /// CORS allow-list; empty ⇒ allow any origin (dev mode).
    #[serde(default)]
    pub cors_allowed_origins: Vec<String>,
    /// WebSocket idle ping interval in seconds.
    #[serde(default = "d_20")]
    pub ws_ping_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: d_host(),
            port: d_port(),
            api_keys_env: d_api_keys_env(),
            cors_allowed_origins: Vec::new(),
            ws_ping_secs: 20,
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// LLM
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of an OpenAI-compatible endpoint (without `/v1`).
    #[serde(default = "d_llm_url")]
    pub base_url: String,
    /// Env var holding the bearer API key.
    #[serde(default = "d_llm_key_env")]
    pub api_key_env: String,
    #[serde(default)]
    pub models: ModelVariants,
    #[serde(default = "d_temperature")]
    pub temperature: f32,
    #[serde(default = "d_max_tokens")]
    pub max_tokens: u32,
    /// Per-call timeout for blocking completions, in seconds.
    #[serde(default = "d_30")]
    pub request_timeout_secs: u64,
    /// Retry a blocking completion once on a transient failure.
    #[serde(default)]
    pub retry_transient: bool,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: d_llm_url(),
            api_key_env: d_llm_key_env(),
            models: ModelVariants::default(),
            temperature: d_temperature(),
            max_tokens: d_max_tokens(),
            request_timeout_secs: 30,
            retry_transient: false,
        }
    }
}

/// Concrete model names behind the `default | fast | creative` variants
/// clients may request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelVariants {
    #[serde(default = "d_model_default")]
    pub default: String,
    #[serde(default = "d_model_fast")]
    pub fast: String,
    #[serde(default = "d_model_creative")]
    pub creative: String,
}

impl Default for ModelVariants {
    fn default() -> Self {
        Self {
            default: d_model_default(),
            fast: d_model_fast(),
            creative: d_model_creative(),
        }
    }
}

impl ModelVariants {
    /// Map a requested variant to a concrete model name.
    pub fn resolve(&self, variant: &str) -> Result<&str> {
        match variant {
            "default" => Ok(&self.default),
            "fast" => Ok(&self.fast),
            "creative" => Ok(&self.creative),
            other => Err(Error::Validation(format!("unknown model variant: {other}"))),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Sessions
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionsConfig {
    /// Messages kept in the memory tier per session.
    #[serde(default = "d_memory_limit")]
    pub memory_limit: usize,
    /// Idle sessions older than this are purged from memory.
    #[serde(default = "d_ttl_hours")]
    pub ttl_hours: u64,
    /// Whether a durable tier is attached at all.
    #[serde(default = "d_true")]
    pub database_enabled: bool,
    /// State directory for the durable tier.
    #[serde(default = "d_state_path")]
    pub state_path: std::path::PathBuf,
    /// History window handed to the LLM each turn.
    #[serde(default = "d_history_window")]
    pub history_window: usize,
}

impl Default for SessionsConfig {
    fn default() -> Self {
        Self {
            memory_limit: d_memory_limit(),
            ttl_hours: d_ttl_hours(),
            database_enabled: true,
            state_path: d_state_path(),
            history_window: d_history_window(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tools
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolsConfig {
    /// Default per-tool execution timeout, in seconds.
    #[serde(default = "d_10")]
    pub timeout_secs: u64,
    /// Result cache entry TTL, in seconds.
    #[serde(default = "d_300")]
    pub cache_ttl_secs: u64,
    /// Result cache capacity (LRU bound).
    #[serde(default = "d_cache_capacity")]
    pub cache_capacity: usize,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 10,
            cache_ttl_secs: 300,
            cache_capacity: d_cache_capacity(),
        }
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Voice
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoiceConfig {
    #[serde(default = "d_voice")]
    pub voice: String,
    #[serde(default = "d_50")]
    pub speed: u8,
    #[serde(default = "d_50")]
    pub volume: u8,
    #[serde(default = "d_50")]
    pub pitch: u8,
}

impl Default for VoiceConfig {
    fn default() -> Self {
        Self {
            voice: d_voice(),
            speed: 50,
            volume: 50,
            pitch: 50,
        }
    }
}

// ── serde defaults ─────────────────────────────────────────────────

fn d_host() -> String {
    "0.0.0.0".into()
}
fn d_port() -> u16 {
    8000
}
fn d_api_keys_env() -> String {
    "VOX_API_KEYS".into()
}
fn d_llm_url() -> String {
    "https://api.openai.com".into()
}
fn d_llm_key_env() -> String {
    "VOX_LLM_API_KEY".into()
}
fn d_model_default() -> String {
    "gpt-5-mini".into()
}
fn d_model_fast() -> String {
    "gpt-5-nano".into()
}
fn d_model_creative() -> String {
    "gpt-5-pro".into()
}
fn d_temperature() -> f32 {
    0.7
}
fn d_max_tokens() -> u32 {
    1500
}
fn d_memory_limit() -> usize {
    20
}
fn d_ttl_hours() -> u64 {
    24
}
fn d_state_path() -> std::path::PathBuf {
    std::path::PathBuf::from("./data")
}
fn d_history_window() -> usize {
    10
}
fn d_cache_capacity() -> usize {
    256
}
fn d_voice() -> String {
    "xiaoyan".into()
}
fn d_true() -> bool {
    true
}
fn d_10() -> u64 {
    10
}
fn d_20() -> u64 {
    20
}
fn d_30() -> u64 {
    30
}
fn d_300() -> u64 {
    300
}
fn d_50() -> u8 {
    50
}
