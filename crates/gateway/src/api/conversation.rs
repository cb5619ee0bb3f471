//! Conversation façade endpoints: text or audio in, text or audio out.
//!
//! Audio bodies are raw PCM (16 kHz, 16-bit, mono) in the request body;
//! audio replies stream as `audio/mpeg` chunks.

use axum::body::Body;
use axum::extract::{Query, State};
use axum::http::header;
use axum::response::{IntoResponse, Response};
use axum::Json;
use bytes::Bytes;
use futures_util::StreamExt;
use serde::Deserialize;

use crate::runtime::{InputMode, OutputMode};
use crate::state::AppState;

use super::error_response;

#[derive(Debug, Deserialize)]
pub struct MessageBody {
    pub message: String,
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Query parameters for the audio-body routes (the body is the audio).
#[derive(Debug, Deserialize, Default)]
pub struct AudioQuery {
    #[serde(default)]
    pub session_id: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/conversation/message — text in, text out
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn message(State(state): State<AppState>, Json(body): Json<MessageBody>) -> Response {
    let outcome = state
        .conversation
        .process_turn(
            InputMode::Text(body.message),
            OutputMode::Text,
            body.session_id,
            body.user_id,
        )
        .await;

    match outcome {
        Ok(envelope) => Json(serde_json::json!({
            "session_id": envelope.session_id,
            "response": envelope.text,
            "metadata": envelope.report.metadata,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/conversation/message-stream — text in, audio out
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn message_stream(
    State(state): State<AppState>,
    Json(body): Json<MessageBody>,
) -> Response {
    let outcome = state
        .conversation
        .process_turn_audio_stream(InputMode::Text(body.message), body.session_id, body.user_id)
        .await;

    match outcome {
        Ok((session_id, stream)) => audio_response(&session_id, stream),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/conversation/message-audio — audio in, text out
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn message_audio(
    State(state): State<AppState>,
    Query(query): Query<AudioQuery>,
    body: Bytes,
) -> Response {
    let outcome = state
        .conversation
        .process_turn(
            InputMode::Audio(body.to_vec()),
            OutputMode::Text,
            query.session_id,
            query.user_id,
        )
        .await;

    match outcome {
        Ok(envelope) => Json(serde_json::json!({
            "session_id": envelope.session_id,
            "response": envelope.text,
            "metadata": envelope.report.metadata,
        }))
        .into_response(),
        Err(e) => error_response(&e),
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// POST /api/v1/conversation/message-audio-stream — audio in, audio out
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub async fn message_audio_stream(
    State(state): State<AppState>,
    Query(query): Query<AudioQuery>,
    body: Bytes,
) -> Response {
    let outcome = state
        .conversation
        .process_turn_audio_stream(InputMode::Audio(body.to_vec()), query.session_id, query.user_id)
        .await;

    match outcome {
        Ok((session_id, stream)) => audio_response(&session_id, stream),
        Err(e) => error_response(&e),
    }
}

/// Wrap an audio chunk stream as a streaming HTTP response. The session
/// id rides in a header since the body is opaque audio.
fn audio_response(session_id: &str, stream: vox_voice::AudioStream) -> Response {
    let body = Body::from_stream(stream.map(|chunk| {
        chunk.map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e.to_string()))
    }));

    (
        [
            (header::CONTENT_TYPE, "audio/mpeg".to_string()),
            (
                header::HeaderName::from_static("x-session-id"),
                session_id.to_string(),
            ),
        ],
        body,
    )
        .into_response()
}
