//! Chat endpoints — the primary interface for running turns.
//!
//! - `POST /api/v1/chat/`        — single turn; JSON reply, or SSE when `stream=true`
//! - `POST /api/v1/chat/stream`  — SSE stream of a turn
//! - `GET  /api/v1/chat/stream`  — same, parameters in the query string
//! - `GET  /api/v1/chat/history/{session_id}` — paginated message history

use axum::extract::{Path, Query, State};
use axum::response::sse::{Event as SseEvent, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::Json;
use futures_util::stream::Stream;
use serde::Deserialize;

use vox_agent::{CancelToken, TurnInput};
use vox_domain::error::Error;
use vox_domain::message::Session;

use crate::state::AppState;

use super::error_response;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Request shapes
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
pub struct ChatBody {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    /// `default | fast | creative`; resolved against configuration.
    #[serde(default)]
    pub model_variant: Option<String>,
    #[serde(default)]
    pub stream: bool,
}

#[derive(Debug, Deserialize)]
pub struct HistoryQuery {
    #[serde(default = "d_history_limit")]
    pub limit: usize,
    #[serde(default)]
    pub offset: usize,
}

fn d_history_limit() -> usize {
    50
}

/// Map a requested model variant to a concrete model name.
fn resolve_model(state: &AppState, variant: Option<&str>) -> Result<String, Error> {
    state
        .config
        .llm
        .models
        .resolve(variant.unwrap_or("default"))
        .map(str::to_string)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/chat/
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat(State(state): State<AppState>, Json(body): Json<ChatBody>) -> Response {
    if body.stream {
        return start_sse_turn(state, body).await;
    }

    let model = match resolve_model(&state, body.model_variant.as_deref()) {
        Ok(m) => m,
        Err(e) => return error_response(&e),
    };
    let session_id = body.session_id.unwrap_or_else(Session::generate_id);

    let report = state
        .orchestrator
        .process_message(TurnInput {
            session_id,
            user_id: body.user_id,
            text: body.message,
            model: Some(model),
        })
        .await;

    Json(report).into_response()
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST/GET /api/v1/chat/stream
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn chat_stream(State(state): State<AppState>, Json(body): Json<ChatBody>) -> Response {
    start_sse_turn(state, body).await
}

#[derive(Debug, Deserialize)]
pub struct StreamQuery {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
    #[serde(default)]
    pub model_variant: Option<String>,
}

pub async fn chat_stream_get(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
) -> Response {
    start_sse_turn(
        state,
        ChatBody {
            message: query.message,
            session_id: query.session_id,
            user_id: query.user_id,
            model_variant: query.model_variant,
            stream: true,
        },
    )
    .await
}

/// Spawn the streaming turn and adapt its event channel to SSE frames.
async fn start_sse_turn(state: AppState, body: ChatBody) -> Response {
    let model = match resolve_model(&state, body.model_variant.as_deref()) {
        Ok(m) => m,
        Err(e) => return error_response(&e),
    };
    let session_id = body.session_id.unwrap_or_else(Session::generate_id);

    let cancel = CancelToken::new();
    // One in-flight stream per session; a predecessor is superseded.
    state.streams.register(&session_id, cancel.clone(), None).await;

    let rx = state.orchestrator.process_message_stream(
        TurnInput {
            session_id: session_id.clone(),
            user_id: body.user_id,
            text: body.message,
            model: Some(model),
        },
        cancel.clone(),
    );

    let stream = make_sse_stream(state, session_id, cancel, rx);
    Sse::new(stream).keep_alive(KeepAlive::default()).into_response()
}

/// One `data: <json>` frame per event; the stream ends after the first
/// terminal event (`end`, `error`, or `cancelled`).
fn make_sse_stream(
    state: AppState,
    session_id: String,
    cancel: CancelToken,
    mut rx: tokio::sync::mpsc::Receiver<vox_domain::event::Event>,
) -> impl Stream<Item = Result<SseEvent, std::convert::Infallible>> {
    async_stream::stream! {
        while let Some(event) = rx.recv().await {
            let terminal = event.is_terminal();
            let data = match serde_json::to_string(&event) {
                Ok(data) => data,
                Err(e) => {
                    tracing::warn!(error = %e, "failed to serialize event");
                    continue;
                }
            };
            yield Ok(SseEvent::default().data(data));
            if terminal {
                break;
            }
        }
        state.streams.unregister_matching(&session_id, &cancel).await;
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// GET /api/v1/chat/history/{session_id}
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn history(
    State(state): State<AppState>,
    Path(session_id): Path<String>,
    Query(query): Query<HistoryQuery>,
) -> Response {
    let messages = state.store.get_history(&session_id, None).await;
    let total = messages.len();

    let page: Vec<_> = messages
        .into_iter()
        .skip(query.offset)
        .take(query.limit)
        .collect();

    Json(serde_json::json!({
        "session_id": session_id,
        "messages": page,
        "total": total,
        "offset": query.offset,
        "limit": query.limit,
    }))
    .into_response()
}
