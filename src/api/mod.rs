use axum::extract::State;
use axum::http::Request;
use axum::middleware::{self, Next};
use axum::response::Response;
use axum::routing::{get, post};
use axum::{Json, Router};
use subtle::ConstantTimeEq;
use tower_http::limit::RequestBodyLimitLayer;

use crate::error::DeskError;
use crate::AppState;

mod annotations;
mod members;

use annotations::*;
use members::*;

/// Auth middleware: checks Bearer token if CLUBDESK_API_KEY is configured.
async fn require_auth(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Result<Response, DeskError> {
    let Some(ref expected) = state.api_key else {
        return Ok(next.run(req).await);
    };

    let unauthorized = || DeskError::Unauthorized;

    let header = req
        .headers()
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .ok_or_else(unauthorized)?;

    let token = header.strip_prefix("Bearer ").ok_or_else(unauthorized)?;

    // constant-time comparison to prevent timing attacks
    if token.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(next.run(req).await)
    } else {
        Err(unauthorized())
    }
}

pub fn router(state: AppState) -> Router {
    let public = Router::new()
        .route("/", get(index))
        .route("/health", get(health));

    let protected = Router::new()
        .route("/members", get(list_members))
        .route("/members/filter", post(filter_members))
        .route("/members/lapsing", get(lapsing))
        .route("/members/{id}/analyze", post(analyze_one))
        .route("/summary", get(summary))
        .route("/annotations", post(enqueue_annotation))
        .route("/annotations/flush", post(flush_annotations))
        .route("/annotations/search", get(search_annotations))
        .route("/analyze/batch", post(analyze_batch))
        .layer(middleware::from_fn_with_state(state.clone(), require_auth));

    public
        .merge(protected)
        .layer(RequestBodyLimitLayer::new(256 * 1024))
        .with_state(state)
}

fn health_data(state: &AppState) -> serde_json::Value {
    serde_json::json!({
        "name": "clubdesk",
        "version": env!("CARGO_PKG_VERSION"),
        "uptime_secs": state.started_at.elapsed().as_secs(),
        "ai_enabled": state.ai.is_some(),
        "ai_demo": state.ai.as_ref().is_some_and(|c| c.demo),
        "queue": state.queue.stats().snapshot(),
    })
}

/// GET / — health data + endpoint list.
async fn index(State(state): State<AppState>) -> Json<serde_json::Value> {
    let mut data = health_data(&state);
    if let Some(obj) = data.as_object_mut() {
        obj.insert("endpoints".to_string(), serde_json::json!({
            "GET /": "index with health data + endpoint list",
            "GET /health": "health data only",
            "GET /members": "all loaded membership records",
            "POST /members/filter": "filtered records (body: FilterCriteria)",
            "GET /members/lapsing": "Active members lapsing within 30 days, most urgent first",
            "POST /members/:id/analyze": "AI-classify one member's feedback",
            "GET /summary": "status + expiry counts over the loaded set",
            "POST /annotations": "queue a staff annotation edit (debounced batch write)",
            "POST /annotations/flush": "force-flush pending annotation edits now",
            "GET /annotations/search?q=term": "search raw annotation rows",
            "POST /analyze/batch": "AI-classify every member with feedback",
        }));
    }
    Json(data)
}

/// GET /health — health data only.
async fn health(State(state): State<AppState>) -> Json<serde_json::Value> {
    Json(health_data(&state))
}
