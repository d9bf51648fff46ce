//! Approval resolution endpoint.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json};
use serde::Deserialize;
use uuid::Uuid;

use pal_domain::approval::ApprovalOutcome;

use crate::state::AppState;

#[derive(Debug, Deserialize)]
pub struct ApprovalResponse {
    pub outcome: ApprovalOutcome,
}

/// `POST /v1/approvals/:approval_id` — resolve a pending approval.
/// 200 on acceptance; 404 when the id is unknown or already resolved
/// (first writer wins).
pub async fn respond(
    State(state): State<AppState>,
    Path(approval_id): Path<Uuid>,
    Json(body): Json<ApprovalResponse>,
) -> impl IntoResponse {
    if state.approvals.resolve(&approval_id, body.outcome) {
        StatusCode::OK.into_response()
    } else {
        (
            StatusCode::NOT_FOUND,
            Json(serde_json::json!({
                "error": "approval not found or already resolved",
            })),
        )
            .into_response()
    }
}

/// `GET /v1/approvals` — pending approvals, for the dashboard.
pub async fn list_pending(State(state): State<AppState>) -> impl IntoResponse {
    Json(serde_json::json!({ "pending": state.approvals.list_pending() }))
}
