//! Distributed ingestion point for agent-pushed probe reports

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, instrument};

use crate::model::{MonitorId, ProbeReport, ProbeResult};
use crate::sentinel::{SentinelError, ServiceSentinel};

/// One probe outcome as agents put it on the wire
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentProbeItem {
    pub monitor_id: MonitorId,
    pub success: bool,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
}

impl From<&ProbeResult> for AgentProbeItem {
    fn from(result: &ProbeResult) -> Self {
        Self {
            monitor_id: result.monitor_id,
            success: result.success,
            latency_ms: result.latency_ms,
            timestamp: result.timestamp,
            error_message: result.error_message.clone(),
            status_code: result.status_code,
            payload: None,
        }
    }
}

impl AgentProbeItem {
    /// Normalize into a report attributed to `agent_id`
    pub fn into_report(self, agent_id: &str) -> ProbeReport {
        let payload = match (self.payload, self.status_code) {
            (Some(Value::Object(mut map)), Some(code)) => {
                map.entry("status_code").or_insert(Value::from(code));
                Some(Value::Object(map))
            }
            (None, Some(code)) => Some(serde_json::json!({ "status_code": code })),
            (payload, _) => payload,
        };

        ProbeReport {
            monitor_id: self.monitor_id,
            origin: Some(agent_id.to_string()),
            success: self.success,
            latency_ms: self.latency_ms,
            timestamp: self.timestamp,
            error_message: self.error_message,
            payload,
        }
    }
}

/// Request body of `POST /api/v1/agents/:agent_id/reports`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AgentReportBatch {
    pub items: Vec<AgentProbeItem>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestSummary {
    pub accepted: usize,
}

/// Hands agent reports to the sentinel one at a time
///
/// Agents don't persist through the hub's repository and aren't evaluated
/// for alerts; their reports only feed the sentinel statistics.
#[derive(Clone)]
pub struct IngestionPoint {
    sentinel: Arc<ServiceSentinel>,
}

impl IngestionPoint {
    pub fn new(sentinel: Arc<ServiceSentinel>) -> Self {
        Self { sentinel }
    }

    #[instrument(skip(self, items), fields(count = items.len()))]
    pub async fn accept_batch(
        &self,
        agent_id: &str,
        items: Vec<AgentProbeItem>,
    ) -> Result<IngestSummary, SentinelError> {
        let mut accepted = 0;
        for item in items {
            self.sentinel.ingest(item.into_report(agent_id)).await?;
            accepted += 1;
        }

        debug!(agent_id, accepted, "agent batch ingested");
        Ok(IngestSummary { accepted })
    }
}
