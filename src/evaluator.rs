//! Failure evaluation: recent window → availability snapshot → alert engine

use std::sync::Arc;

use chrono::{Duration, Utc};
use tracing::{debug, instrument, warn};

use crate::alerts::AlertEngine;
use crate::config::EvaluatorConfig;
use crate::model::{AvailabilityPeriod, ServiceAvailability, ServiceMonitor};
use crate::storage::{MonitorRepository, ResultQuery};

pub struct FailureEvaluator {
    repository: Arc<dyn MonitorRepository>,
    alert_engine: Arc<dyn AlertEngine>,
    config: EvaluatorConfig,
}

impl FailureEvaluator {
    pub fn new(
        repository: Arc<dyn MonitorRepository>,
        alert_engine: Arc<dyn AlertEngine>,
        config: EvaluatorConfig,
    ) -> Self {
        Self {
            repository,
            alert_engine,
            config,
        }
    }

    /// Evaluate a monitor right after one of its results was persisted
    ///
    /// Does nothing unless the monitor has `notify_on_failure`. Repository
    /// and alert engine errors are logged and swallowed; the returned snapshot
    /// is what was handed to the engine, if anything.
    #[instrument(skip(self, monitor), fields(monitor_id = monitor.id))]
    pub async fn evaluate(&self, monitor: &ServiceMonitor) -> Option<ServiceAvailability> {
        if !monitor.notify_on_failure {
            return None;
        }

        let end = Utc::now();
        let start = end - Duration::seconds(self.config.lookback_secs as i64);
        let query = ResultQuery::new(monitor.id, start, end).with_limit(self.config.history_limit);

        let results = match self.repository.query_results(query).await {
            Ok(results) => results,
            Err(e) => {
                warn!("failed to load recent results, skipping evaluation: {}", e);
                return None;
            }
        };

        let snapshot = ServiceAvailability::from_results(
            monitor.id,
            AvailabilityPeriod::Window,
            start,
            end,
            &results,
        );
        debug!(
            total = snapshot.total_checks,
            failed = snapshot.failed_checks,
            availability = snapshot.availability,
            "evaluating service rules"
        );

        if let Err(e) = self
            .alert_engine
            .evaluate_service_rules(monitor.id, &snapshot)
            .await
        {
            warn!("alert engine failed: {}", e);
        }

        Some(snapshot)
    }
}
