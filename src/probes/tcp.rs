//! TCP connect probe with optional request/response check

use std::time::{Duration, Instant};

use chrono::Utc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::ProbeError;
use crate::model::{MAX_BODY_BYTES, MonitorId, ProbeResult, TcpProbeConfig};

#[derive(Debug, Clone, Copy, Default)]
pub struct TcpProbe;

impl TcpProbe {
    pub fn validate(target: &str) -> Result<(), ProbeError> {
        validate_target(target).map(|_| ())
    }

    pub async fn probe(
        &self,
        monitor_id: MonitorId,
        target: &str,
        config: &TcpProbeConfig,
        timeout: Duration,
    ) -> Result<ProbeResult, ProbeError> {
        let target = validate_target(target)?;

        let timestamp = Utc::now();
        let start = Instant::now();

        let outcome = tokio::time::timeout(timeout, exchange(target, config)).await;
        let latency = start.elapsed().as_millis() as u64;

        let result = match outcome {
            Ok(Ok(())) => ProbeResult::succeeded(monitor_id, timestamp, latency),
            Ok(Err(message)) => ProbeResult::failed(monitor_id, timestamp, latency, message),
            Err(_) => ProbeResult::failed(
                monitor_id,
                timestamp,
                latency,
                format!("timed out after {}s talking to {}", timeout.as_secs(), target),
            ),
        };

        debug!(monitor_id, success = result.success, latency, "TCP probe complete");
        Ok(result)
    }
}

/// Targets must be `host:port`, IPv6 literals in brackets
fn validate_target(target: &str) -> Result<&str, ProbeError> {
    let target = target.trim();
    let invalid = || {
        ProbeError::Config(format!(
            "TCP target {:?} must be in host:port form",
            target
        ))
    };

    let (host, port) = target.rsplit_once(':').ok_or_else(invalid)?;
    if host.is_empty() || host == "[]" {
        return Err(invalid());
    }
    port.parse::<u16>().map_err(|_| invalid())?;

    Ok(target)
}

async fn exchange(target: &str, config: &TcpProbeConfig) -> Result<(), String> {
    let mut stream = TcpStream::connect(target)
        .await
        .map_err(|e| format!("connection to {} failed: {}", target, e))?;

    if let Some(payload) = &config.send {
        stream
            .write_all(payload.as_bytes())
            .await
            .map_err(|e| format!("failed to send payload: {}", e))?;
    }

    if let Some(expected) = &config.expect {
        let response = read_until_match(&mut stream, expected).await?;
        if !response.contains(expected.as_str()) {
            return Err(format!(
                "response does not contain {:?} (got {:?})",
                expected, response
            ));
        }
    }

    Ok(())
}

/// Read until `expected` shows up, the peer closes, or the buffer is full
async fn read_until_match(stream: &mut TcpStream, expected: &str) -> Result<String, String> {
    let mut buf = vec![0u8; MAX_BODY_BYTES];
    let mut filled = 0;

    while filled < buf.len() {
        let read = stream
            .read(&mut buf[filled..])
            .await
            .map_err(|e| format!("failed to read response: {}", e))?;
        if read == 0 {
            break;
        }
        filled += read;

        if String::from_utf8_lossy(&buf[..filled]).contains(expected) {
            break;
        }
    }

    Ok(String::from_utf8_lossy(&buf[..filled]).into_owned())
}
