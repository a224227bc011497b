//! Administrative task endpoints
//!
//! Writes go to the repository first and to the scheduler second, so a
//! monitor that is scheduled is always also persisted.

use axum::{
    Json,
    extract::{Path, State},
    http::StatusCode,
};
use tracing::{debug, info};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
    types::TasksResponse,
};
use crate::model::{MonitorId, ProbeResult, ServiceMonitor};
use crate::scheduler::TaskInfo;

/// GET /api/v1/tasks
pub async fn list_tasks(State(state): State<ApiState>) -> Json<TasksResponse> {
    Json(TasksResponse {
        tasks: state.scheduler.list_tasks().await,
    })
}

/// GET /api/v1/tasks/:id
pub async fn get_task(
    State(state): State<ApiState>,
    Path(id): Path<MonitorId>,
) -> ApiResult<Json<TaskInfo>> {
    state
        .scheduler
        .task_status(id)
        .await
        .map(Json)
        .ok_or_else(|| ApiError::NotFound(format!("monitor {} is not scheduled", id)))
}

/// PUT /api/v1/tasks
///
/// Returns the task, or `null` when the monitor is disabled. Disabled
/// monitors are stored without validation so they can always be switched off.
pub async fn upsert_task(
    State(state): State<ApiState>,
    Json(monitor): Json<ServiceMonitor>,
) -> ApiResult<Json<Option<TaskInfo>>> {
    let id = monitor.id;
    if monitor.enabled {
        state.scheduler.validate_monitor(&monitor)?;
    }
    state.repository.upsert_monitor(&monitor).await?;
    state.scheduler.schedule_monitor(monitor).await?;

    info!(monitor_id = id, "monitor saved via API");
    Ok(Json(state.scheduler.task_status(id).await))
}

/// DELETE /api/v1/tasks/:id
pub async fn delete_task(
    State(state): State<ApiState>,
    Path(id): Path<MonitorId>,
) -> ApiResult<StatusCode> {
    let deleted = state.repository.delete_monitor(id).await?;
    let unscheduled = state.scheduler.unschedule_monitor(id).await;

    if !deleted && !unscheduled {
        return Err(ApiError::NotFound(format!("monitor {} not found", id)));
    }

    if !state.sentinel.forget(id).await {
        debug!(monitor_id = id, "deleted monitor had no sentinel statistics");
    }
    Ok(StatusCode::NO_CONTENT)
}

/// POST /api/v1/tasks/:id/probe
pub async fn trigger_probe(
    State(state): State<ApiState>,
    Path(id): Path<MonitorId>,
) -> ApiResult<Json<ProbeResult>> {
    Ok(Json(state.scheduler.trigger_manual_probe(id).await?))
}
