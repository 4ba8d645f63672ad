use std::sync::Arc;
use std::time::Duration;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use http_body_util::BodyExt;
use tower::ServiceExt;

use clubdesk::api::router;
use clubdesk::member::MembershipRecord;
use clubdesk::queue::{AnnotationQueue, QueueConfig};
use clubdesk::store::{MemStore, RecordStore};
use clubdesk::{ai, AppState};

fn seed() -> Vec<MembershipRecord> {
    let rec = |id: &str, first: &str, status: &str, end: &str, comments: &str| MembershipRecord {
        member_id: id.into(),
        first_name: first.into(),
        email: format!("{}@example.com", first.to_lowercase()),
        status: status.into(),
        end_date: end.into(),
        comments: comments.into(),
        ..Default::default()
    };
    let today = chrono::Utc::now().date_naive();
    let in_days = |d: i64| (today + chrono::Duration::days(d)).format("%Y-%m-%d").to_string();
    vec![
        rec("M1", "Ana", "Active", &in_days(4), "asking about price"),
        rec("M2", "Ben", "Churned", &in_days(-30), ""),
        rec("M3", "Carla", "Active", &in_days(60), ""),
    ]
}

fn test_state(api_key: Option<&str>, with_ai: bool) -> (AppState, Arc<MemStore>) {
    let store = Arc::new(MemStore::new(seed()));
    let (queue, _worker) = AnnotationQueue::spawn(
        store.clone(),
        QueueConfig {
            debounce: Duration::from_millis(2000),
            retry_backoff: Duration::from_millis(5000),
        },
    );
    let state = AppState {
        store: store.clone(),
        queue,
        ai: with_ai.then(ai::AiConfig::demo),
        api_key: api_key.map(|s| s.to_string()),
        started_at: std::time::Instant::now(),
    };
    (state, store)
}

async fn body_json(resp: axum::response::Response) -> serde_json::Value {
    let bytes = resp.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}

fn json_req(method: &str, uri: &str, body: serde_json::Value) -> Request<Body> {
    Request::builder()
        .method(method)
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(serde_json::to_vec(&body).unwrap()))
        .unwrap()
}

fn get_req(uri: &str, token: Option<&str>) -> Request<Body> {
    let mut b = Request::builder().method("GET").uri(uri);
    if let Some(t) = token {
        b = b.header("authorization", format!("Bearer {t}"));
    }
    b.body(Body::empty()).unwrap()
}

// --- Auth ---

#[tokio::test]
async fn auth_rejects_no_token() {
    let (state, _) = test_state(Some("secret123"), false);
    let resp = router(state).oneshot(get_req("/members", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn auth_rejects_wrong_token() {
    let (state, _) = test_state(Some("secret123"), false);
    let resp = router(state)
        .oneshot(get_req("/members", Some("wrongtoken")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn auth_passes_correct_token() {
    let (state, _) = test_state(Some("secret123"), false);
    let resp = router(state)
        .oneshot(get_req("/members", Some("secret123")))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
}

#[tokio::test]
async fn health_needs_no_auth() {
    let (state, _) = test_state(Some("secret123"), false);
    let resp = router(state).oneshot(get_req("/health", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["name"], "clubdesk");
    assert!(j["queue"]["pending"].is_number());
}

// --- Members & filtering ---

#[tokio::test]
async fn list_members_returns_all() {
    let (state, _) = test_state(None, false);
    let resp = router(state).oneshot(get_req("/members", None)).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["count"], 3);
}

#[tokio::test]
async fn filter_endpoint_applies_criteria() {
    let (state, _) = test_state(None, false);
    let resp = router(state)
        .oneshot(json_req(
            "POST",
            "/members/filter",
            serde_json::json!({"status": ["Active"], "expiryRange": "expiring-week"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["count"], 1);
    assert_eq!(j["total"], 3);
    assert_eq!(j["members"][0]["memberId"], "M1");
    assert_eq!(j["statusCounts"]["active"], 1);
}

#[tokio::test]
async fn filter_endpoint_empty_body_is_identity() {
    let (state, _) = test_state(None, false);
    let resp = router(state)
        .oneshot(json_req("POST", "/members/filter", serde_json::json!({})))
        .await
        .unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["count"], 3);
}

#[tokio::test]
async fn lapsing_lists_urgent_members() {
    let (state, _) = test_state(None, false);
    let resp = router(state)
        .oneshot(get_req("/members/lapsing", None))
        .await
        .unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["count"], 1);
    assert_eq!(j["members"][0]["memberId"], "M1");
    assert_eq!(j["members"][0]["priority"], "high");
    assert_eq!(j["members"][0]["followUpRequired"], true);
}

#[tokio::test]
async fn summary_reports_counts() {
    let (state, _) = test_state(None, false);
    let resp = router(state).oneshot(get_req("/summary", None)).await.unwrap();
    let j = body_json(resp).await;
    assert_eq!(j["total"], 3);
    assert_eq!(j["statusCounts"]["active"], 2);
    assert_eq!(j["statusCounts"]["churned"], 1);
    assert_eq!(j["expired"], 1);
    assert_eq!(j["expiringWeek"], 1);
    assert_eq!(j["annotated"], 1);
}

// --- Annotations ---

#[tokio::test]
async fn enqueue_then_forced_flush_writes_batch() {
    let (state, store) = test_state(None, false);
    let app = router(state);

    let resp = app
        .clone()
        .oneshot(json_req(
            "POST",
            "/annotations",
            serde_json::json!({"memberId": "M2", "comments": "wants to rejoin", "tags": ["winback"]}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::ACCEPTED);

    let resp = app
        .clone()
        .oneshot(json_req("POST", "/annotations/flush", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["flushed"], 1);

    let records = store.fetch_all().await.unwrap();
    let m2 = records.iter().find(|r| r.member_id == "M2").unwrap();
    assert_eq!(m2.comments, "wants to rejoin");
    assert_eq!(m2.tags, vec!["winback"]);
}

#[tokio::test]
async fn enqueue_without_member_id_is_rejected() {
    let (state, _) = test_state(None, false);
    let resp = router(state)
        .oneshot(json_req(
            "POST",
            "/annotations",
            serde_json::json!({"memberId": "  ", "comments": "x"}),
        ))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn annotation_search_finds_rows() {
    let (state, _) = test_state(None, false);
    let app = router(state);

    let resp = app
        .clone()
        .oneshot(get_req("/annotations/search?q=price", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["count"], 1);
    assert_eq!(j["rows"][0]["memberId"], "M1");

    let resp = app
        .oneshot(get_req("/annotations/search?q=", None))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
}

// --- AI ---

#[tokio::test]
async fn analyze_member_in_demo_mode() {
    let (state, _) = test_state(None, true);
    let resp = router(state)
        .oneshot(json_req("POST", "/members/M1/analyze", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    assert_eq!(j["memberId"], "M1");
    assert_eq!(j["suggestedTags"][0], "Cost concerns");
}

#[tokio::test]
async fn analyze_unknown_member_is_404() {
    let (state, _) = test_state(None, true);
    let resp = router(state)
        .oneshot(json_req("POST", "/members/nope/analyze", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn analyze_without_ai_is_503() {
    let (state, _) = test_state(None, false);
    let resp = router(state)
        .oneshot(json_req("POST", "/members/M1/analyze", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
}

#[tokio::test]
async fn batch_analyze_covers_members_with_content() {
    let (state, _) = test_state(None, true);
    let resp = router(state)
        .oneshot(json_req("POST", "/analyze/batch", serde_json::json!({})))
        .await
        .unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let j = body_json(resp).await;
    // only M1 has comments in the seed
    assert_eq!(j["count"], 1);
    assert_eq!(j["results"][0]["memberId"], "M1");
}
