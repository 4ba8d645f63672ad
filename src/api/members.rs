use axum::extract::{Path, State};
use axum::Json;
use chrono::NaiveDate;

use crate::error::DeskError;
use crate::filter::{self, ExpiryRange, FilterCriteria};
use crate::{ai, AppState};

fn today() -> NaiveDate {
    chrono::Utc::now().date_naive()
}

/// GET /members
pub(super) async fn list_members(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, DeskError> {
    let records = state.store.fetch_all().await?;
    Ok(Json(serde_json::json!({
        "count": records.len(),
        "members": records,
    })))
}

/// POST /members/filter — the filter engine over the loaded set.
pub(super) async fn filter_members(
    State(state): State<AppState>,
    Json(criteria): Json<FilterCriteria>,
) -> Result<Json<serde_json::Value>, DeskError> {
    let records = state.store.fetch_all().await?;
    let total = records.len();
    let matched = filter::apply(&records, &criteria, today());
    let counts = filter::status_counts(&matched);
    Ok(Json(serde_json::json!({
        "count": matched.len(),
        "total": total,
        "statusCounts": counts,
        "members": matched,
    })))
}

/// GET /members/lapsing
pub(super) async fn lapsing(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, DeskError> {
    let records = state.store.fetch_all().await?;
    let members = filter::lapsing_members(&records, today());
    let follow_up = members.iter().filter(|m| m.follow_up_required).count();
    Ok(Json(serde_json::json!({
        "count": members.len(),
        "followUpRequired": follow_up,
        "members": members,
    })))
}

/// GET /summary — the headline numbers the dashboard cards show.
pub(super) async fn summary(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, DeskError> {
    let records = state.store.fetch_all().await?;
    let now = today();

    let expiring = |range: ExpiryRange| {
        let criteria = FilterCriteria { expiry_range: range, ..Default::default() };
        filter::apply(&records, &criteria, now).len()
    };
    let annotated = records.iter().filter(|r| r.has_annotations()).count();

    Ok(Json(serde_json::json!({
        "total": records.len(),
        "statusCounts": filter::status_counts(&records),
        "expired": expiring(ExpiryRange::Expired),
        "expiringWeek": expiring(ExpiryRange::ExpiringWeek),
        "expiringMonth": expiring(ExpiryRange::ExpiringMonth),
        "annotated": annotated,
    })))
}

/// POST /members/:id/analyze
pub(super) async fn analyze_one(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ai::MemberAnalysis>, DeskError> {
    let Some(ref cfg) = state.ai else {
        return Err(DeskError::AiNotConfigured);
    };
    let records = state.store.fetch_all().await?;
    let record = records
        .iter()
        .find(|r| r.member_id == id)
        .ok_or(DeskError::NotFound)?;
    Ok(Json(ai::analyze_member(cfg, record).await))
}

/// POST /analyze/batch — sequential, rate-limited, error-isolated.
pub(super) async fn analyze_batch(
    State(state): State<AppState>,
) -> Result<Json<serde_json::Value>, DeskError> {
    let Some(ref cfg) = state.ai else {
        return Err(DeskError::AiNotConfigured);
    };
    let records = state.store.fetch_all().await?;
    let results = ai::analyze_batch(cfg, &records).await;
    Ok(Json(serde_json::json!({
        "count": results.len(),
        "results": results,
    })))
}
