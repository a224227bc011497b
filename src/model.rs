//! Monitor configuration, probe results and availability rollups
//!
//! These types are shared between the hub (scheduler, sentinel, storage) and
//! the agent (which runs the same probes and ships [`ProbeReport`]s).

use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Datelike, Duration as ChronoDuration, TimeZone, Timelike, Utc};
use serde::{Deserialize, Serialize};

/// Identifier of a service monitor in the registry
pub type MonitorId = i64;

/// Monitors must not be probed more often than this
pub const MIN_INTERVAL_SECS: u64 = 10;

/// Default timeout for HTTP and TCP probes when none is configured
pub const DEFAULT_TIMEOUT_SECS: u64 = 10;

/// ICMP bursts get a generous default since five round trips have to fit in
pub const DEFAULT_ICMP_TIMEOUT_SECS: u64 = 20;

/// Number of failed checks within the evaluation window that trips an alert
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 3;

/// Upper bound for stored response bodies and bounded protocol reads
pub const MAX_BODY_BYTES: usize = 1024;

/// Kind of probe, without its protocol-specific settings
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProbeType {
    Http,
    Tcp,
    Icmp,
}

impl ProbeType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProbeType::Http => "http",
            ProbeType::Tcp => "tcp",
            ProbeType::Icmp => "icmp",
        }
    }
}

impl fmt::Display for ProbeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProbeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "http" | "https" => Ok(ProbeType::Http),
            "tcp" => Ok(ProbeType::Tcp),
            "icmp" | "ping" => Ok(ProbeType::Icmp),
            other => Err(format!("unknown probe type: {other}")),
        }
    }
}

/// HTTP-specific monitor settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HttpProbeConfig {
    /// Request method, GET when unset
    #[serde(default)]
    pub method: Option<String>,

    #[serde(default)]
    pub headers: BTreeMap<String, String>,

    /// Status code that counts as success, 200 when unset
    #[serde(default)]
    pub expected_status: Option<u16>,

    /// Plain substring that must appear in the first KiB of the body
    #[serde(default)]
    pub expected_body: Option<String>,
}

/// TCP-specific monitor settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TcpProbeConfig {
    /// Payload written after the connection is established
    #[serde(default)]
    pub send: Option<String>,

    /// Substring expected in the response to `send`
    #[serde(default)]
    pub expect: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct IcmpProbeConfig {}

/// Protocol of a monitor together with its protocol-specific settings
///
/// Serialized inline into [`ServiceMonitor`] with a `type` tag, so a monitor
/// reads as `{"id": 1, "type": "http", "target": "...", "expected_status": 204}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ProbeSpec {
    Http(HttpProbeConfig),
    Tcp(TcpProbeConfig),
    Icmp(IcmpProbeConfig),
}

impl ProbeSpec {
    pub fn probe_type(&self) -> ProbeType {
        match self {
            ProbeSpec::Http(_) => ProbeType::Http,
            ProbeSpec::Tcp(_) => ProbeType::Tcp,
            ProbeSpec::Icmp(_) => ProbeType::Icmp,
        }
    }
}

/// A configured, recurring probe target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceMonitor {
    pub id: MonitorId,

    pub name: String,

    /// URL for HTTP, `host:port` for TCP, host or IP for ICMP
    pub target: String,

    #[serde(flatten)]
    pub probe: ProbeSpec,

    /// Seconds between two probes
    pub interval: u64,

    /// Seconds before a single probe is abandoned
    #[serde(default)]
    pub timeout: Option<u64>,

    #[serde(default = "default_enabled")]
    pub enabled: bool,

    #[serde(default)]
    pub notify_on_failure: bool,

    #[serde(default = "default_failure_threshold")]
    pub failure_threshold: u32,
}

fn default_enabled() -> bool {
    true
}

fn default_failure_threshold() -> u32 {
    DEFAULT_FAILURE_THRESHOLD
}

impl ServiceMonitor {
    pub fn probe_type(&self) -> ProbeType {
        self.probe.probe_type()
    }

    /// Effective probe timeout, falling back to the per-protocol default
    pub fn timeout(&self) -> Duration {
        let secs = self.timeout.unwrap_or(match self.probe_type() {
            ProbeType::Icmp => DEFAULT_ICMP_TIMEOUT_SECS,
            ProbeType::Http | ProbeType::Tcp => DEFAULT_TIMEOUT_SECS,
        });
        Duration::from_secs(secs.max(1))
    }

    /// Check the invariants the registry is supposed to enforce
    pub fn validate(&self) -> Result<(), String> {
        if self.target.trim().is_empty() {
            return Err(format!("monitor {} has an empty target", self.id));
        }

        if self.interval < MIN_INTERVAL_SECS {
            return Err(format!(
                "monitor {} interval {}s is below the minimum of {}s",
                self.id, self.interval, MIN_INTERVAL_SECS
            ));
        }

        match self.timeout {
            Some(timeout) if timeout >= self.interval => {
                return Err(format!(
                    "monitor {} timeout {}s must be shorter than its interval {}s",
                    self.id, timeout, self.interval
                ));
            }
            _ => {}
        }

        Ok(())
    }
}

/// Outcome of one probe executed by this process
///
/// Network failures are data: `success == false` with a descriptive
/// `error_message`. A successful result may still carry a message when the
/// probe produced a non-fatal warning (e.g. a TLS certificate about to expire).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeResult {
    pub monitor_id: MonitorId,
    pub timestamp: DateTime<Utc>,
    pub success: bool,

    /// Round trip in whole milliseconds
    pub latency_ms: u64,

    /// HTTP status code (HTTP probes only)
    pub status_code: Option<u16>,

    /// First KiB of the response body (HTTP probes only)
    pub response_body: Option<String>,

    pub error_message: Option<String>,
}

impl ProbeResult {
    pub fn succeeded(monitor_id: MonitorId, timestamp: DateTime<Utc>, latency_ms: u64) -> Self {
        Self {
            monitor_id,
            timestamp,
            success: true,
            latency_ms,
            status_code: None,
            response_body: None,
            error_message: None,
        }
    }

    pub fn failed(
        monitor_id: MonitorId,
        timestamp: DateTime<Utc>,
        latency_ms: u64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            monitor_id,
            timestamp,
            success: false,
            latency_ms,
            status_code: None,
            response_body: None,
            error_message: Some(message.into()),
        }
    }

    pub fn with_status_code(mut self, status_code: u16) -> Self {
        self.status_code = Some(status_code);
        self
    }

    pub fn with_body(mut self, body: String) -> Self {
        self.response_body = Some(body);
        self
    }

    /// Attach a warning without changing the outcome
    pub fn with_warning(mut self, warning: impl Into<String>) -> Self {
        if self.error_message.is_none() {
            self.error_message = Some(warning.into());
        }
        self
    }
}

/// Normalized unit consumed by the sentinel, regardless of where it came from
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProbeReport {
    pub monitor_id: MonitorId,

    /// Reporting agent, `None` for probes executed by the hub itself
    pub origin: Option<String>,

    pub success: bool,
    pub latency_ms: u64,
    pub timestamp: DateTime<Utc>,
    pub error_message: Option<String>,

    /// Protocol details the reporter chose to attach
    pub payload: Option<serde_json::Value>,
}

impl ProbeReport {
    pub fn is_local(&self) -> bool {
        self.origin.is_none()
    }
}

impl From<&ProbeResult> for ProbeReport {
    fn from(result: &ProbeResult) -> Self {
        Self {
            monitor_id: result.monitor_id,
            origin: None,
            success: result.success,
            latency_ms: result.latency_ms,
            timestamp: result.timestamp,
            error_message: result.error_message.clone(),
            payload: result
                .status_code
                .map(|code| serde_json::json!({ "status_code": code })),
        }
    }
}

/// Running min/avg/max over latencies of successful probes
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LatencyStats {
    pub count: u64,
    pub sum: u64,
    pub min: Option<u64>,
    pub max: Option<u64>,
}

impl LatencyStats {
    pub fn record(&mut self, latency_ms: u64) {
        self.count += 1;
        self.sum += latency_ms;
        self.min = Some(self.min.map_or(latency_ms, |m| m.min(latency_ms)));
        self.max = Some(self.max.map_or(latency_ms, |m| m.max(latency_ms)));
    }

    pub fn merge(&mut self, other: &LatencyStats) {
        self.count += other.count;
        self.sum += other.sum;
        self.min = match (self.min, other.min) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        };
        self.max = match (self.max, other.max) {
            (Some(a), Some(b)) => Some(a.max(b)),
            (a, b) => a.or(b),
        };
    }

    pub fn avg(&self) -> Option<f64> {
        (self.count > 0).then(|| self.sum as f64 / self.count as f64)
    }
}

/// Granularity of an availability rollup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityPeriod {
    Hour,
    Day,
    Week,
    Month,
    /// Ad-hoc lookback computed for alert evaluation, not a calendar bucket
    Window,
}

impl AvailabilityPeriod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AvailabilityPeriod::Hour => "hour",
            AvailabilityPeriod::Day => "day",
            AvailabilityPeriod::Week => "week",
            AvailabilityPeriod::Month => "month",
            AvailabilityPeriod::Window => "window",
        }
    }

    /// Calendar bucket containing `ts` as `[start, end)`
    ///
    /// Weeks start on Monday. Returns `None` for [`AvailabilityPeriod::Window`].
    pub fn bucket(&self, ts: DateTime<Utc>) -> Option<(DateTime<Utc>, DateTime<Utc>)> {
        let date = ts.date_naive();
        let midnight = |d: chrono::NaiveDate| {
            d.and_hms_opt(0, 0, 0)
                .map(|naive| Utc.from_utc_datetime(&naive))
        };

        match self {
            AvailabilityPeriod::Hour => {
                let start = midnight(date)? + ChronoDuration::hours(ts.hour() as i64);
                Some((start, start + ChronoDuration::hours(1)))
            }
            AvailabilityPeriod::Day => {
                let start = midnight(date)?;
                Some((start, start + ChronoDuration::days(1)))
            }
            AvailabilityPeriod::Week => {
                let offset = date.weekday().num_days_from_monday() as i64;
                let start = midnight(date - ChronoDuration::days(offset))?;
                Some((start, start + ChronoDuration::weeks(1)))
            }
            AvailabilityPeriod::Month => {
                let first = date.with_day(1)?;
                let next = if first.month() == 12 {
                    chrono::NaiveDate::from_ymd_opt(first.year() + 1, 1, 1)?
                } else {
                    chrono::NaiveDate::from_ymd_opt(first.year(), first.month() + 1, 1)?
                };
                Some((midnight(first)?, midnight(next)?))
            }
            AvailabilityPeriod::Window => None,
        }
    }
}

impl fmt::Display for AvailabilityPeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AvailabilityPeriod {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hour" => Ok(AvailabilityPeriod::Hour),
            "day" => Ok(AvailabilityPeriod::Day),
            "week" => Ok(AvailabilityPeriod::Week),
            "month" => Ok(AvailabilityPeriod::Month),
            "window" => Ok(AvailabilityPeriod::Window),
            other => Err(format!("unknown availability period: {other}")),
        }
    }
}

/// Availability rollup for one monitor over one window
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceAvailability {
    pub monitor_id: MonitorId,
    pub period: AvailabilityPeriod,
    pub start_time: DateTime<Utc>,
    pub end_time: DateTime<Utc>,
    pub total_checks: u64,
    pub successful_checks: u64,
    pub failed_checks: u64,

    /// Percentage of successful checks, 100 for an empty window
    pub availability: f64,

    /// Latency statistics over successful checks only
    pub min_latency_ms: Option<u64>,
    pub avg_latency_ms: Option<f64>,
    pub max_latency_ms: Option<u64>,
}

impl ServiceAvailability {
    /// Derive a rollup from the results that fall into `[start, end)`
    ///
    /// Results outside the window or belonging to other monitors are ignored,
    /// so the output only depends on the underlying results and recomputing a
    /// window always yields the same rollup.
    pub fn from_results(
        monitor_id: MonitorId,
        period: AvailabilityPeriod,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        results: &[ProbeResult],
    ) -> Self {
        let mut total = 0;
        let mut successful = 0;
        let mut latency = LatencyStats::default();

        for result in results.iter().filter(|r| {
            r.monitor_id == monitor_id && r.timestamp >= start_time && r.timestamp < end_time
        }) {
            total += 1;
            if result.success {
                successful += 1;
                latency.record(result.latency_ms);
            }
        }

        Self::from_counts(monitor_id, period, start_time, end_time, total, successful, latency)
    }

    pub fn from_counts(
        monitor_id: MonitorId,
        period: AvailabilityPeriod,
        start_time: DateTime<Utc>,
        end_time: DateTime<Utc>,
        total_checks: u64,
        successful_checks: u64,
        latency: LatencyStats,
    ) -> Self {
        Self {
            monitor_id,
            period,
            start_time,
            end_time,
            total_checks,
            successful_checks,
            failed_checks: total_checks - successful_checks,
            availability: availability_percentage(successful_checks, total_checks),
            min_latency_ms: latency.min,
            avg_latency_ms: latency.avg(),
            max_latency_ms: latency.max,
        }
    }
}

/// `successful / total * 100`, treating an empty window as fully available
pub fn availability_percentage(successful: u64, total: u64) -> f64 {
    if total == 0 {
        return 100.0;
    }
    successful as f64 / total as f64 * 100.0
}
