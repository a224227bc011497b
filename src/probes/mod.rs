//! Protocol probes
//!
//! [`ProbeExecutor`] dispatches a [`ServiceMonitor`] to the probe matching
//! its [`ProbeSpec`] variant. Every probe follows the same contract:
//!
//! - network-level failures (refused connections, timeouts, wrong status
//!   codes, packet loss) are reported as `Ok(ProbeResult { success: false, .. })`
//! - `Err(ProbeError)` is reserved for configuration the probe cannot even
//!   attempt (malformed target, invalid method or header)
//!
//! Probes hold no mutable state, so one executor is shared by all tasks.

pub mod http;
pub mod icmp;
pub mod tcp;

use std::error::Error as StdError;
use std::fmt;

use tracing::{debug, instrument};

use crate::model::{ProbeResult, ProbeSpec, ServiceMonitor};

pub use http::HttpProbe;
pub use icmp::IcmpProbe;
pub use tcp::TcpProbe;

/// A probe could not be attempted because of its configuration
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProbeError {
    Config(String),
}

impl fmt::Display for ProbeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProbeError::Config(msg) => write!(f, "invalid probe configuration: {}", msg),
        }
    }
}

impl std::error::Error for ProbeError {}

/// Runs a monitor's probe with the protocol implementation it asks for
#[derive(Clone)]
pub struct ProbeExecutor {
    http: HttpProbe,
    tcp: TcpProbe,
    icmp: IcmpProbe,
}

impl ProbeExecutor {
    pub fn new() -> Result<Self, ProbeError> {
        Ok(Self {
            http: HttpProbe::new()?,
            tcp: TcpProbe,
            icmp: IcmpProbe,
        })
    }

    /// Static configuration checks, without touching the network
    pub fn validate(&self, monitor: &ServiceMonitor) -> Result<(), ProbeError> {
        match &monitor.probe {
            ProbeSpec::Http(config) => HttpProbe::validate(&monitor.target, config),
            ProbeSpec::Tcp(_) => TcpProbe::validate(&monitor.target),
            ProbeSpec::Icmp(_) => IcmpProbe::validate(&monitor.target).map(|_| ()),
        }
    }

    #[instrument(skip(self, monitor), fields(monitor_id = monitor.id, probe_type = %monitor.probe_type()))]
    pub async fn execute(&self, monitor: &ServiceMonitor) -> Result<ProbeResult, ProbeError> {
        let timeout = monitor.timeout();

        let result = match &monitor.probe {
            ProbeSpec::Http(config) => {
                self.http
                    .probe(monitor.id, &monitor.target, config, timeout)
                    .await?
            }
            ProbeSpec::Tcp(config) => {
                self.tcp
                    .probe(monitor.id, &monitor.target, config, timeout)
                    .await?
            }
            ProbeSpec::Icmp(_) => self.icmp.probe(monitor.id, &monitor.target, timeout).await?,
        };

        debug!(
            success = result.success,
            latency_ms = result.latency_ms,
            "probe finished"
        );
        Ok(result)
    }
}

/// Render an error together with its source chain on one line
pub(crate) fn error_chain(err: &(dyn StdError + 'static)) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(inner) = source {
        let text = inner.to_string();
        if !message.contains(&text) {
            message.push_str(": ");
            message.push_str(&text);
        }
        source = inner.source();
    }
    message
}
