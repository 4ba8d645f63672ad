use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::Json;
use std::collections::HashMap;

use crate::error::DeskError;
use crate::member::AnnotationEdit;
use crate::AppState;

/// POST /annotations — enqueue one edit; the queue coalesces and batches.
pub(super) async fn enqueue_annotation(
    State(state): State<AppState>,
    Json(edit): Json<AnnotationEdit>,
) -> Result<(StatusCode, Json<serde_json::Value>), DeskError> {
    if edit.member_id.trim().is_empty() {
        return Err(DeskError::EmptyMemberId);
    }
    state.queue.enqueue(edit)?;
    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({ "queued": true })),
    ))
}

/// POST /annotations/flush — "save now": write everything pending.
pub(super) async fn flush_annotations(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, DeskError> {
    let written = state.queue.flush().await?;
    Ok(Json(serde_json::json!({ "flushed": written })))
}

/// GET /annotations/search?q=term
pub(super) async fn search_annotations(
    State(state): State<AppState>,
    Query(q): Query<HashMap<String, String>>,
) -> Result<Json<serde_json::Value>, DeskError> {
    let term = q.get("q").map(String::as_str).unwrap_or("").trim();
    if term.is_empty() {
        return Err(DeskError::EmptyQuery);
    }
    let rows = state.store.search_annotations(term).await?;
    Ok(Json(serde_json::json!({
        "count": rows.len(),
        "rows": rows,
    })))
}
