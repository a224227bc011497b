//! Where probe results go after a firing

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{instrument, warn};

use crate::actors::uploader::UploaderHandle;
use crate::evaluator::FailureEvaluator;
use crate::ingest::AgentProbeItem;
use crate::model::{ProbeReport, ProbeResult, ServiceMonitor};
use crate::sentinel::ServiceSentinel;
use crate::storage::MonitorRepository;

/// Receives every probe result the scheduler produces
///
/// Implementations swallow and log their own errors; a sink failure never
/// reaches the probe loop.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn handle(&self, monitor: &ServiceMonitor, result: &ProbeResult);
}

/// The hub's per-run pipeline: persist, then Sentinel, then evaluation
pub struct HubPipeline {
    repository: Arc<dyn MonitorRepository>,
    sentinel: Arc<ServiceSentinel>,
    evaluator: Option<Arc<FailureEvaluator>>,
}

impl HubPipeline {
    pub fn new(repository: Arc<dyn MonitorRepository>, sentinel: Arc<ServiceSentinel>) -> Self {
        Self {
            repository,
            sentinel,
            evaluator: None,
        }
    }

    pub fn with_evaluator(mut self, evaluator: Arc<FailureEvaluator>) -> Self {
        self.evaluator = Some(evaluator);
        self
    }
}

#[async_trait]
impl ResultSink for HubPipeline {
    #[instrument(skip_all, fields(monitor_id = monitor.id, success = result.success))]
    async fn handle(&self, monitor: &ServiceMonitor, result: &ProbeResult) {
        if let Err(e) = self.repository.save_result(result).await {
            warn!("failed to persist probe result: {}", e);
        }

        if let Err(e) = self.sentinel.ingest(ProbeReport::from(result)).await {
            warn!("sentinel rejected probe report: {}", e);
        }

        if let Some(evaluator) = &self.evaluator {
            evaluator.evaluate(monitor).await;
        }
    }
}

/// Agent side: results are queued for upload to the hub
pub struct AgentSink {
    uploader: UploaderHandle,
}

impl AgentSink {
    pub fn new(uploader: UploaderHandle) -> Self {
        Self { uploader }
    }
}

#[async_trait]
impl ResultSink for AgentSink {
    async fn handle(&self, monitor: &ServiceMonitor, result: &ProbeResult) {
        if let Err(e) = self.uploader.enqueue(AgentProbeItem::from(result)).await {
            warn!(monitor_id = monitor.id, "dropping probe result: {}", e);
        }
    }
}
