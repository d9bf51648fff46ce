//! Web UI prompt intake.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::{Deserialize, Serialize};

use pal_domain::key::SessionKey;

use crate::runtime;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRequest {
    pub prompt: String,
    pub sender_id: String,
    #[serde(default)]
    pub conversation_id: Option<i64>,
    #[serde(default)]
    pub thread_id: Option<i64>,
    #[serde(default)]
    pub agent_id: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatAccepted {
    pub conversation_id: i64,
    pub thread_id: i64,
    pub agent_id: String,
}

/// `POST /v1/chat` — accept a prompt from the web client. The
/// response stream arrives over the web UI transport subscription,
/// not this request.
pub async fn chat(
    State(state): State<AppState>,
    Json(body): Json<ChatRequest>,
) -> impl IntoResponse {
    if body.prompt.trim().is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(serde_json::json!({ "error": "prompt must not be empty" })),
        )
            .into_response();
    }

    match runtime::submit_web_prompt(
        &state,
        &body.prompt,
        &body.sender_id,
        body.conversation_id,
        body.thread_id,
        body.agent_id.as_deref(),
    )
    .await
    {
        Ok(key) => (
            StatusCode::ACCEPTED,
            Json(serde_json::json!(ChatAccepted {
                conversation_id: key.conversation_id,
                thread_id: key.thread_id,
                agent_id: key.agent_id,
            })),
        )
            .into_response(),
        Err(e) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(serde_json::json!({ "error": e.to_string() })),
        )
            .into_response(),
    }
}

/// `POST /v1/chat/:conversation_id/:thread_id/cancel` — cancel the
/// in-flight turn for a thread.
pub async fn cancel(
    State(state): State<AppState>,
    Path((conversation_id, thread_id)): Path<(i64, i64)>,
) -> impl IntoResponse {
    let matching: Vec<SessionKey> = state
        .registry
        .keys()
        .into_iter()
        .filter(|k| k.conversation_id == conversation_id && k.thread_id == thread_id)
        .collect();
    let mut cancelled = false;
    for key in &matching {
        cancelled |= runtime::cancel_session(&state, key);
    }

    if cancelled {
        StatusCode::OK.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({ "error": "no live session for thread" })),
        )
            .into_response()
    }
}
