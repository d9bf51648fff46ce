pub mod approvals;
pub mod chat;
pub mod stream;

use axum::routing::{get, post};
use axum::Router;

use crate::state::AppState;

/// Build the API router.
pub fn router() -> Router<AppState> {
    Router::new()
        // Health probe
        .route("/v1/health", get(health))
        // Prompt intake for the web UI
        .route("/v1/chat", post(chat::chat))
        .route("/v1/chat/:conversation_id/:thread_id/cancel", post(chat::cancel))
        // Resume protocol
        .route("/v1/threads/:thread_id/stream", get(stream::get_stream_state))
        // Approvals
        .route("/v1/approvals", get(approvals::list_pending))
        .route("/v1/approvals/:approval_id", post(approvals::respond))
        // Introspection
        .route("/v1/sessions", get(list_sessions))
}

async fn health() -> axum::Json<serde_json::Value> {
    axum::Json(serde_json::json!({ "status": "ok" }))
}

async fn list_sessions(
    axum::extract::State(state): axum::extract::State<AppState>,
) -> axum::Json<serde_json::Value> {
    let keys: Vec<String> = state.registry.keys().iter().map(|k| k.to_string()).collect();
    axum::Json(serde_json::json!({ "sessions": keys }))
}
