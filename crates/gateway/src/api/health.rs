//! Aggregated health report. Public: health probes carry no API key.

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;

use crate::state::AppState;

/// GET /api/v1/health/
pub async fn health(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "status": "ok",
        "version": env!("CARGO_PKG_VERSION"),
        "session_store": state.store.stats_snapshot(),
        "tools": {
            "registered": state.registry.len(),
            "executor": state.executor.stats().snapshot(),
        },
        "active_streams": state.streams.active_count().await,
    }))
    .into_response()
}

/// POST /api/v1/health/reset-fallback — operator probe: try to clear the
/// session store's fallback mode.
pub async fn reset_fallback(State(state): State<AppState>) -> Response {
    let recovered = state.store.reset_fallback().await;
    Json(serde_json::json!({
        "recovered": recovered,
        "fallback_mode": state.store.is_fallback(),
    }))
    .into_response()
}
