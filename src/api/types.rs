//! Request and response bodies of the hub API

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::model::{AvailabilityPeriod, MonitorId, ServiceAvailability};
use crate::scheduler::TaskInfo;
use crate::sentinel::{MonitorSummary, RecentProbe};
use crate::storage::HealthStatus;

#[derive(Debug, Clone, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub timestamp: String,
    pub storage: HealthStatus,
    pub scheduled_tasks: usize,
    pub tracked_monitors: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct OverviewResponse {
    pub monitors: Vec<MonitorSummary>,
    pub generated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize)]
pub struct MonitorDetailResponse {
    pub summary: MonitorSummary,
    pub recent: Vec<RecentProbe>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TasksResponse {
    pub tasks: Vec<TaskInfo>,
}

/// Query string of the availability endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct AvailabilityQuery {
    #[serde(default = "default_period")]
    pub period: AvailabilityPeriod,

    /// Defaults to 24 hours ago
    pub since: Option<DateTime<Utc>>,
}

fn default_period() -> AvailabilityPeriod {
    AvailabilityPeriod::Hour
}

#[derive(Debug, Clone, Serialize)]
pub struct AvailabilityResponse {
    pub monitor_id: MonitorId,
    pub period: AvailabilityPeriod,
    pub rollups: Vec<ServiceAvailability>,
}
