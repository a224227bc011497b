//! Aggregated views backed by the sentinel and the rollup tables

use axum::{
    Json,
    extract::{Path, Query, State},
};
use chrono::{Duration, Utc};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::{AvailabilityQuery, AvailabilityResponse, MonitorDetailResponse, OverviewResponse},
};
use crate::model::{AvailabilityPeriod, MonitorId};

/// GET /api/v1/overview
pub async fn overview(State(state): State<ApiState>) -> Json<OverviewResponse> {
    Json(OverviewResponse {
        monitors: state.scheduler.overview().await,
        generated_at: Utc::now(),
    })
}

/// GET /api/v1/overview/:id
pub async fn monitor_detail(
    State(state): State<ApiState>,
    Path(id): Path<MonitorId>,
) -> ApiResult<Json<MonitorDetailResponse>> {
    let summary = state
        .sentinel
        .summary(id)
        .await
        .ok_or_else(|| ApiError::NotFound(format!("no reports for monitor {}", id)))?;

    Ok(Json(MonitorDetailResponse {
        summary,
        recent: state.sentinel.recent(id).await,
    }))
}

/// GET /api/v1/monitors/:id/availability?period=day&since=...
pub async fn availability(
    State(state): State<ApiState>,
    Path(id): Path<MonitorId>,
    Query(query): Query<AvailabilityQuery>,
) -> ApiResult<Json<AvailabilityResponse>> {
    if query.period == AvailabilityPeriod::Window {
        return Err(ApiError::InvalidRequest(
            "window snapshots are not persisted".to_string(),
        ));
    }

    let since = query
        .since
        .unwrap_or_else(|| Utc::now() - Duration::hours(24));
    let rollups = state
        .repository
        .query_availability(id, query.period, since)
        .await?;

    Ok(Json(AvailabilityResponse {
        monitor_id: id,
        period: query.period,
        rollups,
    }))
}
