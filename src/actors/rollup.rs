//! RollupActor - availability rollups and result retention
//!
//! ```text
//! tick (rollups.interval_secs) ─┬─► raw results ──► hour rollups (previous + current hour)
//!                               │                      │
//!                               │                      ▼
//!                               │           day / week / month rollups (previous + current)
//!                               └─► retention: delete results older than retention_days
//! ```
//!
//! Hour rollups are recomputed from raw results; coarser periods are merged
//! from the hour rollups of the same range. Every write is an upsert keyed by
//! `(monitor, period, start)`, so a pass can run any number of times.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, warn};

use crate::model::{AvailabilityPeriod, LatencyStats, MonitorId, ServiceAvailability};
use crate::storage::{MonitorRepository, ResultQuery, StorageError, StorageResult};

use super::messages::{RollupCommand, RollupReport};

const MERGED_PERIODS: [AvailabilityPeriod; 3] = [
    AvailabilityPeriod::Day,
    AvailabilityPeriod::Week,
    AvailabilityPeriod::Month,
];

/// The bucket containing `now` and the one right before it
fn recent_buckets(
    period: AvailabilityPeriod,
    now: DateTime<Utc>,
) -> Option<[(DateTime<Utc>, DateTime<Utc>); 2]> {
    let current = period.bucket(now)?;
    let previous = period.bucket(current.0 - chrono::Duration::milliseconds(1))?;
    Some([previous, current])
}

/// Fold finer rollups into one rollup spanning `[start, end)`
pub fn merge_rollups(
    monitor_id: MonitorId,
    period: AvailabilityPeriod,
    start: DateTime<Utc>,
    end: DateTime<Utc>,
    parts: &[ServiceAvailability],
) -> ServiceAvailability {
    let mut total = 0;
    let mut successful = 0;
    let mut latency = LatencyStats::default();

    for part in parts
        .iter()
        .filter(|p| p.monitor_id == monitor_id && p.start_time >= start && p.start_time < end)
    {
        total += part.total_checks;
        successful += part.successful_checks;
        latency.merge(&LatencyStats {
            count: part.successful_checks,
            sum: part
                .avg_latency_ms
                .map_or(0, |avg| (avg * part.successful_checks as f64).round() as u64),
            min: part.min_latency_ms,
            max: part.max_latency_ms,
        });
    }

    ServiceAvailability::from_counts(monitor_id, period, start, end, total, successful, latency)
}

/// Recompute the recent rollups of every enabled monitor
#[instrument(skip(repository))]
pub async fn roll_up(repository: &dyn MonitorRepository, now: DateTime<Utc>) -> StorageResult<usize> {
    let monitors = repository.list_enabled_monitors().await?;
    let mut written = 0;

    for monitor in &monitors {
        match roll_up_monitor(repository, monitor.id, now).await {
            Ok(count) => written += count,
            Err(e) => warn!(monitor_id = monitor.id, "rollup failed: {}", e),
        }
    }

    debug!(monitors = monitors.len(), written, "rollup pass complete");
    Ok(written)
}

async fn roll_up_monitor(
    repository: &dyn MonitorRepository,
    monitor_id: MonitorId,
    now: DateTime<Utc>,
) -> StorageResult<usize> {
    let invalid = || StorageError::QueryFailed(format!("no calendar bucket for {}", now));
    let mut written = 0;

    let hours = recent_buckets(AvailabilityPeriod::Hour, now).ok_or_else(invalid)?;
    let results = repository
        .query_results(ResultQuery::new(monitor_id, hours[0].0, hours[1].1))
        .await?;
    for (start, end) in hours {
        let rollup = ServiceAvailability::from_results(
            monitor_id,
            AvailabilityPeriod::Hour,
            start,
            end,
            &results,
        );
        repository.save_availability(&rollup).await?;
        written += 1;
    }

    for period in MERGED_PERIODS {
        let buckets = recent_buckets(period, now).ok_or_else(invalid)?;
        let hourly = repository
            .query_availability(monitor_id, AvailabilityPeriod::Hour, buckets[0].0)
            .await?;
        for (start, end) in buckets {
            let rollup = merge_rollups(monitor_id, period, start, end, &hourly);
            repository.save_availability(&rollup).await?;
            written += 1;
        }
    }

    Ok(written)
}

/// Delete probe results older than `retention_days`; 0 keeps everything
pub async fn purge_expired(
    repository: &dyn MonitorRepository,
    retention_days: u32,
    now: DateTime<Utc>,
) -> StorageResult<usize> {
    if retention_days == 0 {
        return Ok(0);
    }

    let cutoff = now - chrono::Duration::days(retention_days as i64);
    let deleted = repository.cleanup_results(cutoff).await?;
    if deleted > 0 {
        info!(deleted, %cutoff, "purged expired probe results");
    }
    Ok(deleted)
}

pub struct RollupActor {
    repository: Arc<dyn MonitorRepository>,
    interval: Duration,
    retention_days: u32,
    command_rx: mpsc::Receiver<RollupCommand>,
}

impl RollupActor {
    pub fn new(
        repository: Arc<dyn MonitorRepository>,
        interval: Duration,
        retention_days: u32,
        command_rx: mpsc::Receiver<RollupCommand>,
    ) -> Self {
        Self {
            repository,
            interval,
            retention_days,
            command_rx,
        }
    }

    async fn run_once(&self) -> StorageResult<RollupReport> {
        let now = Utc::now();
        let rollups = roll_up(self.repository.as_ref(), now).await?;
        let purged = purge_expired(self.repository.as_ref(), self.retention_days, now).await?;
        Ok(RollupReport { rollups, purged })
    }

    #[instrument(skip(self))]
    pub async fn run(mut self) {
        debug!(interval = ?self.interval, retention_days = self.retention_days, "starting rollup actor");

        let mut ticker = interval_at(Instant::now() + self.interval, self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                command = self.command_rx.recv() => {
                    match command {
                        Some(RollupCommand::RunNow { respond_to }) => {
                            let _ = respond_to.send(self.run_once().await);
                        }
                        Some(RollupCommand::Shutdown) | None => break,
                    }
                }

                _ = ticker.tick() => {
                    if let Err(e) = self.run_once().await {
                        warn!("rollup pass failed: {}", e);
                    }
                }
            }
        }

        debug!("rollup actor stopped");
    }
}

#[derive(Clone)]
pub struct RollupHandle {
    sender: mpsc::Sender<RollupCommand>,
}

impl RollupHandle {
    pub fn spawn(
        repository: Arc<dyn MonitorRepository>,
        interval: Duration,
        retention_days: u32,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(8);
        let actor = RollupActor::new(repository, interval.max(Duration::from_secs(1)), retention_days, cmd_rx);
        tokio::spawn(actor.run());
        Self { sender: cmd_tx }
    }

    /// Run a rollup and retention pass now and wait for it
    pub async fn run_now(&self) -> anyhow::Result<RollupReport> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(RollupCommand::RunNow { respond_to: tx })
            .await?;
        Ok(rx.await??)
    }

    pub async fn shutdown(self) {
        let _ = self.sender.send(RollupCommand::Shutdown).await;
    }
}
