//! Session CRUD.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use vox_domain::message::Session;

use crate::state::AppState;

#[derive(Debug, Deserialize, Default)]
pub struct CreateSessionBody {
    #[serde(default)]
    pub user_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ListSessionsQuery {
    pub user_id: String,
}

/// GET /api/v1/session/ — a user's sessions from the durable tier.
pub async fn list_sessions(
    State(state): State<AppState>,
    axum::extract::Query(query): axum::extract::Query<ListSessionsQuery>,
) -> Response {
    let sessions = state.store.list_user_sessions(&query.user_id, None).await;
    let count = sessions.len();
    Json(serde_json::json!({
        "user_id": query.user_id,
        "sessions": sessions,
        "count": count,
    }))
    .into_response()
}

/// POST /api/v1/session/ — mint a new session id. Durable rows appear
/// lazily with the first message.
pub async fn create_session(
    State(_state): State<AppState>,
    body: Option<Json<CreateSessionBody>>,
) -> Response {
    let body = body.map(|Json(b)| b).unwrap_or_default();
    let session = Session::new(Session::generate_id(), body.user_id);

    Json(serde_json::json!({
        "session_id": session.session_id,
        "user_id": session.user_id,
        "status": session.status,
        "created_at": session.created_at,
    }))
    .into_response()
}

/// GET /api/v1/session/{id} — session summary from the store.
pub async fn get_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    let messages = state.store.get_history(&session_id, None).await;
    if messages.is_empty() {
        return (
            axum::http::StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": format!("session not found: {session_id}"),
                "error_code": "NOT_FOUND",
            })),
        )
            .into_response();
    }

    Json(serde_json::json!({
        "session_id": session_id,
        "message_count": messages.len(),
        "first_message_at": messages.first().map(|m| m.timestamp),
        "last_message_at": messages.last().map(|m| m.timestamp),
    }))
    .into_response()
}

/// DELETE /api/v1/session/{id} — both tiers; missing sessions are a
/// non-error.
pub async fn delete_session(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
) -> Response {
    state.store.delete_session(&session_id).await;
    Json(serde_json::json!({
        "session_id": session_id,
        "deleted": true,
    }))
    .into_response()
}
