//! API surface.
//!
//! Routes live under `/api/v1`. Health is public; everything else sits
//! behind the `X-API-Key` middleware (a no-op in dev mode).

pub mod auth;
pub mod chat;
pub mod conversation;
pub mod health;
pub mod sessions;
pub mod tools;
pub mod ws;

use axum::middleware;
use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the full API router.
pub fn router(state: AppState) -> Router<AppState> {
    let public = Router::new()
        .route("/api/v1/health/", get(health::health))
        .route("/api/v1/health/reset-fallback", post(health::reset_fallback));

    let protected = Router::new()
        // Chat (core runtime)
        .route("/api/v1/chat/", post(chat::chat))
        .route(
            "/api/v1/chat/stream",
            post(chat::chat_stream).get(chat::chat_stream_get),
        )
        .route("/api/v1/chat/ws", get(ws::chat_ws))
        .route("/api/v1/chat/history/:session_id", get(chat::history))
        // Session CRUD
        .route(
            "/api/v1/session/",
            post(sessions::create_session).get(sessions::list_sessions),
        )
        .route(
            "/api/v1/session/:session_id",
            get(sessions::get_session).delete(sessions::delete_session),
        )
        // Tools
        .route("/api/v1/tools/", get(tools::catalog))
        .route("/api/v1/tools/execute/:name", post(tools::execute))
        // Conversation façade
        .route("/api/v1/conversation/message", post(conversation::message))
        .route(
            "/api/v1/conversation/message-stream",
            post(conversation::message_stream),
        )
        .route(
            "/api/v1/conversation/message-audio",
            post(conversation::message_audio),
        )
        .route(
            "/api/v1/conversation/message-audio-stream",
            post(conversation::message_audio_stream),
        )
        .layer(middleware::from_fn_with_state(
            state.clone(),
            auth::require_api_key,
        ));

    public.merge(protected)
}

/// Standardized JSON error response from a domain error.
pub(crate) fn error_response(error: &vox_domain::Error) -> axum::response::Response {
    use axum::response::IntoResponse;
    let status = axum::http::StatusCode::from_u16(error.http_status())
        .unwrap_or(axum::http::StatusCode::INTERNAL_SERVER_ERROR);
    (
        status,
        axum::Json(serde_json::json!({
            "error": error.to_string(),
            "error_code": error.error_code(),
        })),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use sha2::{Digest, Sha256};
    use tower::ServiceExt;

    use vox_agent::{Orchestrator, OrchestratorConfig};
    use vox_checkpoint::MemoryCheckpointer;
    use vox_domain::config::Config;
    use vox_domain::stream::{BoxStream, StreamEvent, Usage};
    use vox_llm::{ChatOutcome, ChatRequest, LlmClient};
    use vox_sessions::HybridSessionStore;
    use vox_tools::builtin::CalculatorTool;
    use vox_tools::{ToolExecutor, ToolRegistry};

    use crate::runtime::{ConversationService, StreamTaskManager};
    use crate::state::AppState;

    /// Fixed-output model double for transport tests.
    struct CannedLlm;

    #[async_trait::async_trait]
    impl LlmClient for CannedLlm {
        async fn complete(&self, req: &ChatRequest) -> vox_domain::Result<ChatOutcome> {
            Ok(ChatOutcome {
                content: "All good.".into(),
                tool_calls: Vec::new(),
                usage: None,
                model: req.model.clone(),
            })
        }

        async fn stream(
            &self,
            _req: &ChatRequest,
        ) -> vox_domain::Result<BoxStream<'static, vox_domain::Result<StreamEvent>>> {
            let stream = async_stream::stream! {
                yield Ok(StreamEvent::Token { text: "All ".into() });
                yield Ok(StreamEvent::Token { text: "good.".into() });
                yield Ok(StreamEvent::Done {
                    usage: Some(Usage { prompt_tokens: 4, completion_tokens: 2, total_tokens: 6 }),
                    finish_reason: Some("stop".into()),
                });
            };
            Ok(Box::pin(stream))
        }
    }

    fn test_state(api_key_hashes: Vec<[u8; 32]>) -> AppState {
        let config = Arc::new(Config::default());
        let registry = Arc::new(ToolRegistry::new());
        registry.register(Arc::new(CalculatorTool)).unwrap();
        let executor = Arc::new(ToolExecutor::new(
            registry.clone(),
            32,
            Duration::from_secs(300),
            Duration::from_secs(10),
        ));
        let store = Arc::new(HybridSessionStore::memory_only(20, 24));
        let orchestrator = Arc::new(Orchestrator::new(
            Arc::new(CannedLlm),
            executor.clone(),
            store.clone(),
            Arc::new(MemoryCheckpointer::new()),
            None,
            OrchestratorConfig::default(),
        ));
        let conversation = Arc::new(ConversationService::new(
            orchestrator.clone(),
            None,
            None,
            config.voice.clone(),
        ));

        AppState {
            config,
            orchestrator,
            store,
            registry,
            executor,
            streams: Arc::new(StreamTaskManager::new()),
            conversation,
            api_key_hashes: Arc::new(api_key_hashes),
        }
    }

    fn app(state: AppState) -> axum::Router {
        router(state.clone()).with_state(state)
    }

    fn post_json(uri: &str, body: serde_json::Value) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    async fn json_body(response: axum::response::Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_is_public_and_aggregated() {
        let response = app(test_state(vec![]))
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["status"], "ok");
        assert!(body["session_store"]["cache_hits"].is_number());
        assert_eq!(body["tools"]["registered"], 1);
    }

    #[tokio::test]
    async fn chat_turn_end_to_end() {
        let state = test_state(vec![]);
        let response = app(state.clone())
            .oneshot(post_json(
                "/api/v1/chat/",
                serde_json::json!({"message": "how are you doing", "stream": false}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["response"], "All good.");
        assert_eq!(body["metadata"]["tool_calls"], 0);

        // User then assistant rows landed in the store.
        let session_id = body["session_id"].as_str().unwrap();
        let history = state.store.get_history(session_id, None).await;
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].content, "how are you doing");
    }

    #[tokio::test]
    async fn unknown_model_variant_is_rejected() {
        let response = app(test_state(vec![]))
            .oneshot(post_json(
                "/api/v1/chat/",
                serde_json::json!({"message": "hi there", "model_variant": "turbo"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error_code"], "VALIDATION");
    }

    #[tokio::test]
    async fn api_key_gate_protects_everything_but_health() {
        let hash: [u8; 32] = Sha256::digest(b"sekret").into();
        let state = test_state(vec![hash]);

        // No key: protected route refuses.
        let response = app(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/tools/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        // Health stays open.
        let response = app(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/health/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        // The right key passes.
        let response = app(state)
            .oneshot(
                Request::builder()
                    .uri("/api/v1/tools/")
                    .header("x-api-key", "sekret")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn tool_catalog_and_direct_execution() {
        let state = test_state(vec![]);

        let response = app(state.clone())
            .oneshot(
                Request::builder()
                    .uri("/api/v1/tools/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["tools"][0], "calculator");
        assert_eq!(body["schemas"][0]["function"]["name"], "calculator");

        let response = app(state.clone())
            .oneshot(post_json(
                "/api/v1/tools/execute/calculator",
                serde_json::json!({"expression": "6*7"}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = json_body(response).await;
        assert_eq!(body["success"], true);
        assert_eq!(body["result"]["result"], "42");
        assert!(body["execution_time_ms"].is_number());

        let response = app(state)
            .oneshot(post_json(
                "/api/v1/tools/execute/nonexistent",
                serde_json::json!({}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn sse_stream_delivers_ordered_frames() {
        let response = app(test_state(vec![]))
            .oneshot(post_json(
                "/api/v1/chat/stream",
                serde_json::json!({"message": "tell me a story", "session_id": "sse-1"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let raw = response.into_body().collect().await.unwrap().to_bytes();
        let raw = String::from_utf8_lossy(&raw);

        let events: Vec<serde_json::Value> = raw
            .split("\n\n")
            .filter_map(|frame| frame.trim().strip_prefix("data: "))
            .filter_map(|data| serde_json::from_str(data).ok())
            .collect();
        assert!(!events.is_empty());

        // Same session everywhere, unique ids.
        let mut seen = std::collections::HashSet::new();
        for event in &events {
            assert_eq!(event["session_id"], "sse-1");
            assert!(seen.insert(event["id"].as_str().unwrap().to_string()));
        }

        // Transport ordering: start before deltas, end closes the stream
        // with the concatenation of the deltas.
        let types: Vec<&str> = events
            .iter()
            .map(|e| e["type"].as_str().unwrap())
            .filter(|t| matches!(*t, "start" | "delta" | "end"))
            .collect();
        assert_eq!(types.first(), Some(&"start"));
        assert_eq!(types.last(), Some(&"end"));

        let concat: String = events
            .iter()
            .filter(|e| e["type"] == "delta")
            .map(|e| e["content"].as_str().unwrap())
            .collect();
        let end = events.iter().find(|e| e["type"] == "end").unwrap();
        assert_eq!(end["content"].as_str().unwrap(), concat);
        assert_eq!(concat, "All good.");
    }

    #[tokio::test]
    async fn session_crud_round_trip() {
        let state = test_state(vec![]);

        let response = app(state.clone())
            .oneshot(post_json("/api/v1/session/", serde_json::json!({})))
            .await
            .unwrap();
        let body = json_body(response).await;
        let fresh_id = body["session_id"].as_str().unwrap().to_string();
        assert!(fresh_id.starts_with("sess_"));

        // No messages yet: lookup is a 404.
        let response = app(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/session/{fresh_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);

        // Run a turn, then history and delete work.
        let response = app(state.clone())
            .oneshot(post_json(
                "/api/v1/chat/",
                serde_json::json!({"message": "remember me", "session_id": fresh_id}),
            ))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let response = app(state.clone())
            .oneshot(
                Request::builder()
                    .uri(format!("/api/v1/chat/history/{fresh_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let body = json_body(response).await;
        assert_eq!(body["total"], 2);
        assert_eq!(body["messages"][0]["role"], "user");

        let response = app(state.clone())
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri(format!("/api/v1/session/{fresh_id}"))
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert!(state.store.get_history(&fresh_id, None).await.is_empty());
    }

    #[tokio::test]
    async fn audio_routes_require_collaborators() {
        let response = app(test_state(vec![]))
            .oneshot(post_json(
                "/api/v1/conversation/message-stream",
                serde_json::json!({"message": "speak to me"}),
            ))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = json_body(response).await;
        assert_eq!(body["error_code"], "VALIDATION");
    }
}
