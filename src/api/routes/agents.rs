//! Agent report transport

use axum::{
    Json,
    extract::{Path, State},
};

use crate::api::{
    error::{ApiError, ApiResult},
    state::ApiState,
};
use crate::ingest::{AgentReportBatch, IngestSummary};

/// POST /api/v1/agents/:agent_id/reports
pub async fn ingest_reports(
    State(state): State<ApiState>,
    Path(agent_id): Path<String>,
    Json(batch): Json<AgentReportBatch>,
) -> ApiResult<Json<IngestSummary>> {
    let agent_id = agent_id.trim();
    if agent_id.is_empty() {
        return Err(ApiError::InvalidRequest("agent id must not be empty".to_string()));
    }

    let summary = state.ingestion.accept_batch(agent_id, batch.items).await?;
    Ok(Json(summary))
}
