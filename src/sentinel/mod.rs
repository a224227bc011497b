//! Service Sentinel - concurrent aggregation of probe reports
//!
//! Reports arrive from two directions: the local scheduler (one task per
//! monitor firing) and the agent ingestion point (one HTTP request per batch).
//! The sentinel folds them into per-monitor [`MonitorAccumulator`]s.
//!
//! ## Locking
//!
//! ```text
//! lifecycle: RwLock<Lifecycle>          read per ingest, write on start/stop
//!   monitors: RwLock<HashMap<id, ..>>   read-mostly, write only for new ids
//!     Arc<Mutex<MonitorAccumulator>>    one per monitor
//! ```
//!
//! Two reporters updating the same monitor serialize on that monitor's mutex,
//! reporters for different monitors never contend. `stop()` takes the
//! lifecycle write lock, which waits for in-flight ingests to finish and makes
//! every later ingest fail with [`SentinelError::Stopped`].

pub mod accumulator;

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use futures::future::join_all;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, instrument, trace, warn};

use crate::config::SentinelConfig;
use crate::model::{MonitorId, ProbeReport, ServiceAvailability};
use crate::storage::{MonitorRepository, ResultQuery};

pub use accumulator::{MonitorAccumulator, MonitorSummary, RecentProbe, ServiceStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentinelError {
    /// The sentinel has been stopped and accepts no more reports
    Stopped,
}

impl fmt::Display for SentinelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SentinelError::Stopped => write!(f, "service sentinel is stopped"),
        }
    }
}

impl std::error::Error for SentinelError {}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Lifecycle {
    Created,
    Running,
    Stopped,
}

type SharedAccumulator = Arc<Mutex<MonitorAccumulator>>;

pub struct ServiceSentinel {
    config: SentinelConfig,
    lifecycle: RwLock<Lifecycle>,
    monitors: RwLock<HashMap<MonitorId, SharedAccumulator>>,
}

impl ServiceSentinel {
    pub fn new(config: SentinelConfig) -> Self {
        Self {
            config,
            lifecycle: RwLock::new(Lifecycle::Created),
            monitors: RwLock::new(HashMap::new()),
        }
    }

    fn horizon(&self) -> Duration {
        Duration::days(self.config.retention_days as i64)
    }

    /// Warm accumulators from persisted results of all enabled monitors
    ///
    /// Runs under the lifecycle write lock, so reports arriving meanwhile wait
    /// until warm-up is done instead of interleaving with it.
    #[instrument(skip_all)]
    pub async fn start(&self, repository: Arc<dyn MonitorRepository>) {
        let mut lifecycle = self.lifecycle.write().await;
        if *lifecycle != Lifecycle::Created {
            warn!("sentinel start requested in state {:?}, ignoring", *lifecycle);
            return;
        }

        let monitors = match repository.list_enabled_monitors().await {
            Ok(monitors) => monitors,
            Err(e) => {
                warn!("failed to list monitors for warm-up: {}", e);
                Vec::new()
            }
        };

        let now = Utc::now();
        let since = now - self.horizon();

        let histories = join_all(monitors.iter().map(|monitor| {
            let repository = Arc::clone(&repository);
            let query = ResultQuery::new(monitor.id, since, now);
            async move { (query.monitor_id, repository.query_results(query).await) }
        }))
        .await;

        let mut warmed = 0;
        for (monitor_id, history) in histories {
            match history {
                Ok(results) => {
                    let accumulator = self.accumulator(monitor_id).await;
                    let mut accumulator = accumulator.lock().await;
                    for result in &results {
                        accumulator.record(&ProbeReport::from(result), now);
                    }
                    warmed += results.len();
                }
                Err(e) => warn!(monitor_id, "failed to load history for warm-up: {}", e),
            }
        }

        *lifecycle = Lifecycle::Running;
        info!(
            monitors = monitors.len(),
            results = warmed,
            "service sentinel started"
        );
    }

    /// Stop accepting reports once in-flight ingests have finished
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.write().await;
        *lifecycle = Lifecycle::Stopped;
        info!("service sentinel stopped");
    }

    async fn accumulator(&self, monitor_id: MonitorId) -> SharedAccumulator {
        if let Some(existing) = self.monitors.read().await.get(&monitor_id) {
            return Arc::clone(existing);
        }

        let mut monitors = self.monitors.write().await;
        Arc::clone(monitors.entry(monitor_id).or_insert_with(|| {
            debug!(monitor_id, "tracking new monitor");
            Arc::new(Mutex::new(MonitorAccumulator::new(
                monitor_id,
                self.config.bucket_secs,
                self.horizon(),
                self.config.recent_capacity,
            )))
        }))
    }

    /// Fold one report into its monitor's statistics
    pub async fn ingest(&self, report: ProbeReport) -> Result<(), SentinelError> {
        let lifecycle = self.lifecycle.read().await;
        if *lifecycle == Lifecycle::Stopped {
            return Err(SentinelError::Stopped);
        }

        let now = Utc::now();
        let max_skew = Duration::seconds(self.config.max_clock_skew_secs as i64);
        if report.timestamp > now + max_skew {
            warn!(
                monitor_id = report.monitor_id,
                origin = report.origin.as_deref().unwrap_or("local"),
                timestamp = %report.timestamp,
                "report from the future dropped, check the reporter's clock"
            );
            return Ok(());
        }

        let accumulator = self.accumulator(report.monitor_id).await;
        let recorded = accumulator.lock().await.record(&report, now);
        if !recorded {
            trace!(
                monitor_id = report.monitor_id,
                timestamp = %report.timestamp,
                "report older than the sentinel horizon dropped"
            );
        }

        drop(lifecycle);
        Ok(())
    }

    async fn tracked(&self) -> Vec<SharedAccumulator> {
        self.monitors.read().await.values().cloned().collect()
    }

    /// Summaries of every tracked monitor, ordered by id
    pub async fn snapshot(&self) -> Vec<MonitorSummary> {
        let now = Utc::now();
        let mut summaries = Vec::new();
        for accumulator in self.tracked().await {
            summaries.push(accumulator.lock().await.summary(now));
        }
        summaries.sort_by_key(|s| s.monitor_id);
        summaries
    }

    pub async fn summary(&self, monitor_id: MonitorId) -> Option<MonitorSummary> {
        let accumulator = self.monitors.read().await.get(&monitor_id).cloned()?;
        let summary = accumulator.lock().await.summary(Utc::now());
        Some(summary)
    }

    pub async fn availability_since(
        &self,
        monitor_id: MonitorId,
        since: DateTime<Utc>,
    ) -> Option<ServiceAvailability> {
        let accumulator = self.monitors.read().await.get(&monitor_id).cloned()?;
        let availability = accumulator.lock().await.availability_since(since, Utc::now());
        Some(availability)
    }

    pub async fn recent(&self, monitor_id: MonitorId) -> Vec<RecentProbe> {
        match self.monitors.read().await.get(&monitor_id).cloned() {
            Some(accumulator) => accumulator.lock().await.recent(),
            None => Vec::new(),
        }
    }

    /// Drop all statistics of a monitor, e.g. after it was deleted
    pub async fn forget(&self, monitor_id: MonitorId) -> bool {
        self.monitors.write().await.remove(&monitor_id).is_some()
    }

    pub async fn monitor_count(&self) -> usize {
        self.monitors.read().await.len()
    }
}
