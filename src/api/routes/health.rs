//! Health check endpoint

use std::collections::HashMap;

use axum::{Json, extract::State};

use crate::api::{state::ApiState, types::HealthResponse};
use crate::storage::HealthStatus;

/// GET /api/v1/health
///
/// Always answers 200; `status` is "degraded" when the repository is unhealthy.
pub async fn health_check(State(state): State<ApiState>) -> Json<HealthResponse> {
    let storage = state
        .repository
        .health_check()
        .await
        .unwrap_or_else(|e| HealthStatus {
            healthy: false,
            message: e.to_string(),
            metadata: HashMap::new(),
        });

    Json(HealthResponse {
        status: if storage.healthy { "ok" } else { "degraded" }.to_string(),
        timestamp: chrono::Utc::now().to_rfc3339(),
        storage,
        scheduled_tasks: state.scheduler.task_count().await,
        tracked_monitors: state.sentinel.monitor_count().await,
    })
}
