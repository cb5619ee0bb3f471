//! Tool catalog and direct invocation (admin/testing).

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Response};
use axum::Json;

use vox_domain::tool::ToolCall;

use crate::state::AppState;

/// GET /api/v1/tools/ — the registered catalog with schemas.
pub async fn catalog(State(state): State<AppState>) -> Response {
    Json(serde_json::json!({
        "tools": state.registry.list(),
        "schemas": state.registry.schemas(),
        "count": state.registry.len(),
    }))
    .into_response()
}

/// POST /api/v1/tools/execute/{name} — run one tool with the request
/// body as arguments. Unknown names are a 404; execution failures come
/// back as a failed ToolResult with HTTP 200.
pub async fn execute(
    State(state): State<AppState>,
    Path(name): Path<String>,
    body: Option<Json<serde_json::Value>>,
) -> Response {
    if state.registry.get(&name).is_none() {
        return (
            axum::http::StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": format!("tool not found: {name}"),
                "error_code": "NOT_FOUND",
            })),
        )
            .into_response();
    }

    let arguments = body
        .map(|Json(v)| v)
        .unwrap_or(serde_json::Value::Object(Default::default()));
    let call = ToolCall::new(&name, arguments);

    let started = std::time::Instant::now();
    let result = state.executor.execute(&call).await;
    let execution_time_ms = started.elapsed().as_millis() as u64;

    Json(serde_json::json!({
        "tool": name,
        "call_id": result.call_id,
        "success": result.success,
        "result": result.result,
        "error": result.error,
        "execution_time_ms": execution_time_ms,
    }))
    .into_response()
}
