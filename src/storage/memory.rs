//! In-memory repository (no persistence)
//!
//! Used by the agent, which only needs its own monitor list, and by tests.
//! All data is lost on restart.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::debug;

use super::backend::{HealthStatus, MonitorRepository, ResultQuery};
use super::error::{StorageError, StorageResult};
use crate::model::{AvailabilityPeriod, MonitorId, ProbeResult, ServiceAvailability, ServiceMonitor};

#[derive(Default)]
struct MemoryState {
    monitors: BTreeMap<MonitorId, ServiceMonitor>,

    /// Results per monitor, kept sorted by timestamp
    results: HashMap<MonitorId, Vec<ProbeResult>>,

    rollups: HashMap<(MonitorId, AvailabilityPeriod), BTreeMap<DateTime<Utc>, ServiceAvailability>>,
}

/// In-memory repository backed by a single `RwLock`
#[derive(Default)]
pub struct MemoryRepository {
    state: RwLock<MemoryState>,
    offline: AtomicBool,
}

impl MemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a repository pre-populated with monitors
    pub fn with_monitors(monitors: impl IntoIterator<Item = ServiceMonitor>) -> Self {
        let state = MemoryState {
            monitors: monitors.into_iter().map(|m| (m.id, m)).collect(),
            ..Default::default()
        };

        Self {
            state: RwLock::new(state),
            offline: AtomicBool::new(false),
        }
    }

    /// Make every operation fail with [`StorageError::Unavailable`]
    ///
    /// Lets callers exercise how the pipeline copes with a database outage.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::SeqCst);
    }

    /// Total number of stored probe results across all monitors
    pub async fn result_count(&self) -> usize {
        self.state.read().await.results.values().map(Vec::len).sum()
    }

    fn ensure_online(&self) -> StorageResult<()> {
        if self.offline.load(Ordering::SeqCst) {
            return Err(StorageError::Unavailable(
                "in-memory repository is offline".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl MonitorRepository for MemoryRepository {
    async fn list_enabled_monitors(&self) -> StorageResult<Vec<ServiceMonitor>> {
        self.ensure_online()?;
        let state = self.state.read().await;
        Ok(state.monitors.values().filter(|m| m.enabled).cloned().collect())
    }

    async fn get_monitor(&self, id: MonitorId) -> StorageResult<Option<ServiceMonitor>> {
        self.ensure_online()?;
        Ok(self.state.read().await.monitors.get(&id).cloned())
    }

    async fn upsert_monitor(&self, monitor: &ServiceMonitor) -> StorageResult<()> {
        self.ensure_online()?;
        self.state
            .write()
            .await
            .monitors
            .insert(monitor.id, monitor.clone());
        Ok(())
    }

    async fn delete_monitor(&self, id: MonitorId) -> StorageResult<bool> {
        self.ensure_online()?;
        Ok(self.state.write().await.monitors.remove(&id).is_some())
    }

    async fn save_result(&self, result: &ProbeResult) -> StorageResult<()> {
        self.ensure_online()?;
        let mut state = self.state.write().await;
        let results = state.results.entry(result.monitor_id).or_default();

        // Results may arrive out of order; insert after any equal timestamps
        let index = results.partition_point(|r| r.timestamp <= result.timestamp);
        results.insert(index, result.clone());
        Ok(())
    }

    async fn query_results(&self, query: ResultQuery) -> StorageResult<Vec<ProbeResult>> {
        self.ensure_online()?;
        debug!("querying in-memory results for monitor {}", query.monitor_id);

        let state = self.state.read().await;
        let Some(results) = state.results.get(&query.monitor_id) else {
            return Ok(Vec::new());
        };

        let in_range: Vec<&ProbeResult> = results
            .iter()
            .filter(|r| r.timestamp >= query.start && r.timestamp < query.end)
            .collect();

        let skip = query
            .limit
            .map(|limit| in_range.len().saturating_sub(limit))
            .unwrap_or(0);

        Ok(in_range.into_iter().skip(skip).cloned().collect())
    }

    async fn save_availability(&self, availability: &ServiceAvailability) -> StorageResult<()> {
        self.ensure_online()?;
        self.state
            .write()
            .await
            .rollups
            .entry((availability.monitor_id, availability.period))
            .or_default()
            .insert(availability.start_time, availability.clone());
        Ok(())
    }

    async fn query_availability(
        &self,
        monitor_id: MonitorId,
        period: AvailabilityPeriod,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<ServiceAvailability>> {
        self.ensure_online()?;
        let state = self.state.read().await;
        Ok(state
            .rollups
            .get(&(monitor_id, period))
            .map(|rollups| rollups.range(since..).map(|(_, a)| a.clone()).collect())
            .unwrap_or_default())
    }

    async fn cleanup_results(&self, before: DateTime<Utc>) -> StorageResult<usize> {
        self.ensure_online()?;
        let mut state = self.state.write().await;
        let mut deleted = 0;

        for results in state.results.values_mut() {
            let cut = results.partition_point(|r| r.timestamp < before);
            results.drain(..cut);
            deleted += cut;
        }
        state.results.retain(|_, results| !results.is_empty());

        debug!("deleted {} in-memory results older than {}", deleted, before);
        Ok(deleted)
    }

    async fn health_check(&self) -> StorageResult<HealthStatus> {
        let state = self.state.read().await;
        let healthy = !self.offline.load(Ordering::SeqCst);

        Ok(HealthStatus {
            healthy,
            message: if healthy {
                "In-memory repository operational".to_string()
            } else {
                "In-memory repository offline".to_string()
            },
            metadata: HashMap::from([
                ("backend".to_string(), "memory".to_string()),
                ("monitors".to_string(), state.monitors.len().to_string()),
                (
                    "results".to_string(),
                    state.results.values().map(Vec::len).sum::<usize>().to_string(),
                ),
            ]),
        })
    }

    async fn close(&self) -> StorageResult<()> {
        debug!("closing in-memory repository (no-op)");
        Ok(())
    }
}
