//! API-key middleware.
//!
//! Keys arrive in the `X-API-Key` header and are checked against the
//! SHA-256 digests computed once at startup from the configured env var.
//! No configured keys ⇒ dev mode, everything passes. Health routes are
//! mounted outside this middleware.

use axum::body::Body;
use axum::extract::State;
use axum::http::Request;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;

use crate::state::AppState;

/// Parse the comma-separated key list from an env var into digests.
pub fn load_key_hashes(env_name: &str) -> Vec<[u8; 32]> {
    let raw = match std::env::var(env_name) {
        Ok(raw) => raw,
        Err(_) => return Vec::new(),
    };
    raw.split(',')
        .map(str::trim)
        .filter(|key| !key.is_empty())
        .map(|key| Sha256::digest(key.as_bytes()).into())
        .collect()
}

/// Axum middleware enforcing the key check on protected routes.
pub async fn require_api_key(
    State(state): State<AppState>,
    req: Request<Body>,
    next: Next,
) -> Response {
    if state.api_key_hashes.is_empty() {
        return next.run(req).await;
    }

    let provided = req
        .headers()
        .get("x-api-key")
        .and_then(|v| v.to_str().ok())
        .unwrap_or("");

    // Hash first so the comparison is constant-time over fixed-length
    // digests and leaks nothing about key length.
    let provided_hash: [u8; 32] = Sha256::digest(provided.as_bytes()).into();
    let valid = state
        .api_key_hashes
        .iter()
        .any(|expected| bool::from(provided_hash.ct_eq(expected)));

    if !valid {
        return (
            axum::http::StatusCode::UNAUTHORIZED,
            axum::Json(serde_json::json!({
                "error": "invalid or missing API key",
                "error_code": "AUTH",
            })),
        )
            .into_response();
    }

    next.run(req).await
}
