//! Helper functions for integration tests

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use service_sentinel::{
    alerts::{AlertEngine, AlertError},
    model::{
        HttpProbeConfig, IcmpProbeConfig, MonitorId, ProbeReport, ProbeResult, ProbeSpec,
        ServiceAvailability, ServiceMonitor, TcpProbeConfig,
    },
    scheduler::ResultSink,
};
use tokio::sync::Mutex;

pub fn http_monitor(id: MonitorId, url: &str, config: HttpProbeConfig) -> ServiceMonitor {
    ServiceMonitor {
        id,
        name: format!("http-{id}"),
        target: url.to_string(),
        probe: ProbeSpec::Http(config),
        interval: 30,
        timeout: Some(5),
        enabled: true,
        notify_on_failure: false,
        failure_threshold: 3,
    }
}

pub fn tcp_monitor(id: MonitorId, target: &str) -> ServiceMonitor {
    ServiceMonitor {
        id,
        name: format!("tcp-{id}"),
        target: target.to_string(),
        probe: ProbeSpec::Tcp(TcpProbeConfig::default()),
        interval: 10,
        timeout: Some(1),
        enabled: true,
        notify_on_failure: false,
        failure_threshold: 3,
    }
}

pub fn icmp_monitor(id: MonitorId, target: &str) -> ServiceMonitor {
    ServiceMonitor {
        id,
        name: format!("icmp-{id}"),
        target: target.to_string(),
        probe: ProbeSpec::Icmp(IcmpProbeConfig::default()),
        interval: 60,
        timeout: None,
        enabled: true,
        notify_on_failure: false,
        failure_threshold: 3,
    }
}

/// A loopback address nothing listens on
pub async fn closed_port() -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    addr.to_string()
}

pub fn report(monitor_id: MonitorId, success: bool, timestamp: DateTime<Utc>) -> ProbeReport {
    ProbeReport {
        monitor_id,
        origin: None,
        success,
        latency_ms: 10,
        timestamp,
        error_message: (!success).then(|| "down".to_string()),
        payload: None,
    }
}

/// Sink that remembers every delivered result
#[derive(Default)]
pub struct RecordingSink {
    pub results: Mutex<Vec<ProbeResult>>,
}

impl RecordingSink {
    pub async fn count(&self) -> usize {
        self.results.lock().await.len()
    }

    /// Poll until at least `expected` results arrived, giving up after `attempts`
    pub async fn wait_for(&self, expected: usize, attempts: usize) -> usize {
        for _ in 0..attempts {
            let count = self.count().await;
            if count >= expected {
                return count;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        self.count().await
    }
}

#[async_trait]
impl ResultSink for RecordingSink {
    async fn handle(&self, _monitor: &ServiceMonitor, result: &ProbeResult) {
        self.results.lock().await.push(result.clone());
    }
}

/// Alert engine that remembers every snapshot it was given
#[derive(Default)]
pub struct RecordingEngine {
    pub calls: Mutex<Vec<(MonitorId, ServiceAvailability)>>,
}

#[async_trait]
impl AlertEngine for RecordingEngine {
    async fn evaluate_service_rules(
        &self,
        monitor_id: MonitorId,
        availability: &ServiceAvailability,
    ) -> Result<(), AlertError> {
        self.calls
            .lock()
            .await
            .push((monitor_id, availability.clone()));
        Ok(())
    }
}
