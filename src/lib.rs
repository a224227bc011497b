//! Service monitoring: probe scheduling, execution and aggregation
//!
//! A hub schedules HTTP, TCP and ICMP probes for every configured monitor,
//! persists each result, folds it into the [`sentinel::ServiceSentinel`]
//! statistics and lets the [`evaluator::FailureEvaluator`] decide whether the
//! alert engine needs to hear about it. Agents run the same scheduler
//! elsewhere and push their results to the hub's ingestion endpoint.

pub mod actors;
pub mod alerts;
#[cfg(feature = "api")]
pub mod api;
pub mod config;
pub mod discord;
pub mod evaluator;
pub mod ingest;
pub mod model;
pub mod probes;
pub mod scheduler;
pub mod sentinel;
pub mod storage;
pub mod util;

pub use model::{
    AvailabilityPeriod, MonitorId, ProbeReport, ProbeResult, ProbeSpec, ProbeType,
    ServiceAvailability, ServiceMonitor,
};
