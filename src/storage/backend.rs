//! Repository trait definition
//!
//! This module defines the `MonitorRepository` trait that every persistence
//! backend implements.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;

use super::error::StorageResult;
use crate::model::{AvailabilityPeriod, MonitorId, ProbeResult, ServiceAvailability, ServiceMonitor};

/// Query parameters for fetching probe results within a time range
#[derive(Debug, Clone)]
pub struct ResultQuery {
    pub monitor_id: MonitorId,

    /// Start of time range (inclusive)
    pub start: DateTime<Utc>,

    /// End of time range (exclusive)
    pub end: DateTime<Utc>,

    /// Keep only the most recent `limit` results of the range
    pub limit: Option<usize>,
}

impl ResultQuery {
    pub fn new(monitor_id: MonitorId, start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self {
            monitor_id,
            start,
            end,
            limit: None,
        }
    }

    pub fn with_limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }
}

/// Health status of the repository
#[derive(Debug, Clone, Serialize)]
pub struct HealthStatus {
    /// Is the backend operational?
    pub healthy: bool,

    /// Human-readable status message
    pub message: String,

    /// Additional backend-specific metadata
    pub metadata: HashMap<String, String>,
}

/// Persistent registry of monitors and their probe history
///
/// The scheduler reads monitors and writes results through this trait, the
/// failure evaluator reads recent windows and the rollup actor writes
/// [`ServiceAvailability`] rows. Implementations must be `Send + Sync` as they
/// are shared across tasks behind an `Arc`.
///
/// Results returned by queries are always ordered by timestamp, oldest first.
#[async_trait]
pub trait MonitorRepository: Send + Sync {
    /// All monitors with `enabled == true`
    ///
    /// Stored definitions that can no longer be decoded (for example an
    /// unknown probe type) are logged and skipped rather than failing the load.
    async fn list_enabled_monitors(&self) -> StorageResult<Vec<ServiceMonitor>>;

    async fn get_monitor(&self, id: MonitorId) -> StorageResult<Option<ServiceMonitor>>;

    /// Insert or replace a monitor definition
    async fn upsert_monitor(&self, monitor: &ServiceMonitor) -> StorageResult<()>;

    /// Returns whether a monitor was removed
    async fn delete_monitor(&self, id: MonitorId) -> StorageResult<bool>;

    async fn save_result(&self, result: &ProbeResult) -> StorageResult<()>;

    async fn query_results(&self, query: ResultQuery) -> StorageResult<Vec<ProbeResult>>;

    /// Insert or replace a rollup keyed by (monitor, period, start time)
    async fn save_availability(&self, availability: &ServiceAvailability) -> StorageResult<()>;

    /// Rollups of one period starting at or after `since`, oldest first
    async fn query_availability(
        &self,
        monitor_id: MonitorId,
        period: AvailabilityPeriod,
        since: DateTime<Utc>,
    ) -> StorageResult<Vec<ServiceAvailability>>;

    /// Delete probe results older than `before`, returning how many were removed
    async fn cleanup_results(&self, before: DateTime<Utc>) -> StorageResult<usize>;

    async fn health_check(&self) -> StorageResult<HealthStatus>;

    /// Close the backend and release resources
    async fn close(&self) -> StorageResult<()>;
}
