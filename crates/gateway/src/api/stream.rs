//! Resume endpoint — hands a reconnecting client the buffered stream
//! state for a thread.

use axum::extract::{Path, State};
use axum::response::{IntoResponse, Json};

use pal_domain::chunk::StreamState;

use crate::state::AppState;

/// `GET /v1/threads/:thread_id/stream` — the server-side stream state.
/// A thread with no live or grace-window buffer yields the idle state
/// (nothing to resume).
pub async fn get_stream_state(
    State(state): State<AppState>,
    Path(thread_id): Path<i64>,
) -> impl IntoResponse {
    let snapshot = state
        .buffers
        .snapshot_by_thread(thread_id)
        .unwrap_or_else(StreamState::default);
    Json(snapshot)
}
