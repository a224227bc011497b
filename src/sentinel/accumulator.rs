//! Per-monitor rolling statistics

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::model::{
    AvailabilityPeriod, LatencyStats, MonitorId, ProbeReport, ServiceAvailability,
    availability_percentage,
};

/// Aggregated counts for one fixed-width time slice
#[derive(Debug, Clone, Copy, Default)]
struct Bucket {
    total: u64,
    successful: u64,
    latency: LatencyStats,
}

/// One entry of the short per-report history
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RecentProbe {
    pub timestamp: DateTime<Utc>,
    pub success: bool,
    pub latency_ms: u64,
    pub origin: Option<String>,
    pub error_message: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    Up,
    Down,
    Unknown,
}

/// Point-in-time view of one monitor, built from pre-aggregated numbers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MonitorSummary {
    pub monitor_id: MonitorId,
    pub status: ServiceStatus,
    pub last_checked: Option<DateTime<Utc>>,
    pub last_latency_ms: Option<u64>,
    pub last_error: Option<String>,
    pub total_reports: u64,
    pub availability_24h: f64,
    pub avg_latency_24h_ms: Option<f64>,

    /// Latencies of the most recent reports, oldest first
    pub latency_trend: Vec<u64>,

    /// Agents that reported this monitor
    pub origins: Vec<String>,
}

/// Rolling history of one monitor
///
/// Reports are bucketed by their own timestamp, not by arrival time, so late
/// or out-of-order reports land in the right slice. Buckets older than the
/// horizon are evicted on every write.
#[derive(Debug)]
pub struct MonitorAccumulator {
    monitor_id: MonitorId,
    bucket_secs: i64,
    horizon: Duration,
    recent_capacity: usize,
    buckets: BTreeMap<i64, Bucket>,
    recent: VecDeque<RecentProbe>,
    total_reports: u64,
    origins: BTreeSet<String>,
}

impl MonitorAccumulator {
    pub fn new(
        monitor_id: MonitorId,
        bucket_secs: u64,
        horizon: Duration,
        recent_capacity: usize,
    ) -> Self {
        Self {
            monitor_id,
            bucket_secs: bucket_secs.max(1) as i64,
            horizon,
            recent_capacity: recent_capacity.max(1),
            buckets: BTreeMap::new(),
            recent: VecDeque::new(),
            total_reports: 0,
            origins: BTreeSet::new(),
        }
    }

    fn bucket_start(&self, ts: DateTime<Utc>) -> i64 {
        ts.timestamp().div_euclid(self.bucket_secs) * self.bucket_secs
    }

    /// Fold one report in; returns `false` if it was older than the horizon
    pub fn record(&mut self, report: &ProbeReport, now: DateTime<Utc>) -> bool {
        let cutoff = self.bucket_start(now - self.horizon);
        let start = self.bucket_start(report.timestamp);
        if start < cutoff {
            return false;
        }

        let bucket = self.buckets.entry(start).or_default();
        bucket.total += 1;
        if report.success {
            bucket.successful += 1;
            bucket.latency.record(report.latency_ms);
        }

        let entry = RecentProbe {
            timestamp: report.timestamp,
            success: report.success,
            latency_ms: report.latency_ms,
            origin: report.origin.clone(),
            error_message: report.error_message.clone(),
        };
        let index = self
            .recent
            .partition_point(|r| r.timestamp <= report.timestamp);
        self.recent.insert(index, entry);
        while self.recent.len() > self.recent_capacity {
            self.recent.pop_front();
        }

        if let Some(origin) = &report.origin {
            self.origins.insert(origin.clone());
        }
        self.total_reports += 1;

        // split_off keeps keys >= cutoff
        self.buckets = self.buckets.split_off(&cutoff);
        true
    }

    pub fn total_reports(&self) -> u64 {
        self.total_reports
    }

    pub fn recent(&self) -> Vec<RecentProbe> {
        self.recent.iter().cloned().collect()
    }

    /// Availability over the buckets overlapping `[since, now]`
    ///
    /// Precision is one bucket: the bucket containing `since` counts in full.
    pub fn availability_since(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> ServiceAvailability {
        let mut total = 0;
        let mut successful = 0;
        let mut latency = LatencyStats::default();

        for bucket in self.buckets.range(self.bucket_start(since)..).map(|(_, b)| b) {
            total += bucket.total;
            successful += bucket.successful;
            latency.merge(&bucket.latency);
        }

        ServiceAvailability::from_counts(
            self.monitor_id,
            AvailabilityPeriod::Window,
            since,
            now,
            total,
            successful,
            latency,
        )
    }

    pub fn summary(&self, now: DateTime<Utc>) -> MonitorSummary {
        let last = self.recent.back();
        let day = self.availability_since(now - Duration::hours(24), now);

        MonitorSummary {
            monitor_id: self.monitor_id,
            status: match last {
                Some(probe) if probe.success => ServiceStatus::Up,
                Some(_) => ServiceStatus::Down,
                None => ServiceStatus::Unknown,
            },
            last_checked: last.map(|p| p.timestamp),
            last_latency_ms: last.filter(|p| p.success).map(|p| p.latency_ms),
            last_error: last.and_then(|p| p.error_message.clone()),
            total_reports: self.total_reports,
            availability_24h: availability_percentage(day.successful_checks, day.total_checks),
            avg_latency_24h_ms: day.avg_latency_ms,
            latency_trend: self
                .recent
                .iter()
                .filter(|p| p.success)
                .map(|p| p.latency_ms)
                .collect(),
            origins: self.origins.iter().cloned().collect(),
        }
    }

    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}
