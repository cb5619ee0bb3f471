//! Bidirectional streaming chat over WebSocket.
//!
//! Inbound messages are JSON objects with a `type` field:
//! - `{"type":"message", "message":…, "session_id"?, "user_id"?, "model_variant"?}`
//!   starts a streaming turn (registered with the stream task manager).
//! - `{"type":"cancel", "session_id"?}` cancels the in-flight turn.
//! - `{"type":"close"}` closes the socket.
//!
//! Outbound messages are protocol events serialized as JSON text frames.
//! Unknown inbound types are answered with an `error` event and ignored.

use std::time::Duration;

use axum::extract::ws::{Message as WsMessage, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::mpsc;

use vox_agent::{CancelToken, EventEmitter, TurnInput};
use vox_domain::message::Session;

use crate::state::AppState;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound protocol
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum Inbound {
    Message {
        message: String,
        #[serde(default)]
        session_id: Option<String>,
        #[serde(default)]
        user_id: Option<String>,
        #[serde(default)]
        model_variant: Option<String>,
    },
    Cancel {
        #[serde(default)]
        session_id: Option<String>,
    },
    Close,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Handler
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// GET /api/v1/chat/ws — upgrade to WebSocket.
pub async fn chat_ws(ws: WebSocketUpgrade, State(state): State<AppState>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, state))
}

async fn handle_socket(socket: WebSocket, state: AppState) {
    let (mut sink, mut inbound) = socket.split();
    let (out_tx, mut out_rx) = mpsc::channel::<String>(64);
    let ping_interval = Duration::from_secs(state.config.server.ws_ping_secs.max(1));

    // Writer task: outbound frames plus an idle ping.
    let writer = tokio::spawn(async move {
        let mut ping = tokio::time::interval(ping_interval);
        ping.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                frame = out_rx.recv() => match frame {
                    Some(json) => {
                        if sink.send(WsMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                },
                _ = ping.tick() => {
                    if sink.send(WsMessage::Ping(Vec::new())).await.is_err() {
                        break;
                    }
                }
            }
        }
        let _ = sink.close().await;
    });

    // The session most recently used on this socket; lets a bare
    // `{"type":"cancel"}` find its turn.
    let mut last_session: Option<String> = None;

    while let Some(Ok(message)) = inbound.next().await {
        match message {
            WsMessage::Text(text) => {
                if handle_inbound(&state, &out_tx, &mut last_session, &text).await {
                    break;
                }
            }
            WsMessage::Close(_) => break,
            WsMessage::Ping(_) | WsMessage::Pong(_) | WsMessage::Binary(_) => {}
        }
    }

    // Socket gone: an in-flight turn for this socket's session is
    // cancelled rather than left streaming into the void.
    if let Some(session_id) = &last_session {
        state.streams.cancel(session_id).await;
    }
    writer.abort();
}

/// Returns `true` when the socket should close.
async fn handle_inbound(
    state: &AppState,
    out_tx: &mpsc::Sender<String>,
    last_session: &mut Option<String>,
    raw: &str,
) -> bool {
    let inbound: Inbound = match serde_json::from_str(raw) {
        Ok(inbound) => inbound,
        Err(e) => {
            send_error(out_tx, None, &format!("unrecognized message: {e}"), "VALIDATION").await;
            return false;
        }
    };

    match inbound {
        Inbound::Message {
            message,
            session_id,
            user_id,
            model_variant,
        } => {
            let model = match state
                .config
                .llm
                .models
                .resolve(model_variant.as_deref().unwrap_or("default"))
            {
                Ok(m) => m.to_string(),
                Err(e) => {
                    send_error(out_tx, session_id.as_deref(), &e.to_string(), "VALIDATION").await;
                    return false;
                }
            };
            let session_id = session_id.unwrap_or_else(Session::generate_id);
            *last_session = Some(session_id.clone());

            let cancel = CancelToken::new();
            let mut rx = state.orchestrator.process_message_stream(
                TurnInput {
                    session_id: session_id.clone(),
                    user_id,
                    text: message,
                    model: Some(model),
                },
                cancel.clone(),
            );

            // Forwarder: events → outbound frames; unregisters itself on
            // completion (only its own entry, in case a newer stream for
            // the same session superseded it).
            let forward_tx = out_tx.clone();
            let streams = state.streams.clone();
            let forward_session = session_id.clone();
            let forward_cancel = cancel.clone();
            let handle = tokio::spawn(async move {
                while let Some(event) = rx.recv().await {
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            if forward_tx.send(json).await.is_err() {
                                break;
                            }
                        }
                        Err(e) => tracing::warn!(error = %e, "failed to serialize event"),
                    }
                }
                streams.unregister_matching(&forward_session, &forward_cancel).await;
            });

            state.streams.register(&session_id, cancel, Some(handle)).await;
            false
        }

        Inbound::Cancel { session_id } => {
            let target = session_id.or_else(|| last_session.clone());
            match target {
                Some(session_id) => {
                    // The turn emits the `cancelled` event itself once it
                    // observes the token; nothing found means nothing to do.
                    if !state.streams.cancel(&session_id).await {
                        send_error(
                            out_tx,
                            Some(&session_id),
                            "no active stream for session",
                            "NOT_FOUND",
                        )
                        .await;
                    }
                }
                None => {
                    send_error(out_tx, None, "cancel requires a session_id", "VALIDATION").await;
                }
            }
            false
        }

        Inbound::Close => true,
    }
}

async fn send_error(
    out_tx: &mpsc::Sender<String>,
    session_id: Option<&str>,
    message: &str,
    code: &str,
) {
    let emitter = EventEmitter::new(session_id.map(str::to_string));
    let event = emitter.error_message(message, Some(code.to_string()));
    if let Ok(json) = serde_json::to_string(&event) {
        let _ = out_tx.send(json).await;
    }
}
