//! HTTP(S) probe

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use reqwest::header::{HeaderMap, HeaderName, HeaderValue};
use reqwest::tls::TlsInfo;
use reqwest::{Method, Url};
use tracing::{debug, warn};

use super::{ProbeError, error_chain};
use crate::model::{HttpProbeConfig, MAX_BODY_BYTES, MonitorId, ProbeResult};

/// Certificates closer than this to expiry produce a warning
pub const CERT_WARNING_DAYS: i64 = 30;

const DEFAULT_EXPECTED_STATUS: u16 = 200;

#[derive(Clone)]
pub struct HttpProbe {
    client: reqwest::Client,
}

impl HttpProbe {
    pub fn new() -> Result<Self, ProbeError> {
        let client = reqwest::Client::builder()
            .user_agent(concat!("service-sentinel/", env!("CARGO_PKG_VERSION")))
            .tls_info(true)
            .build()
            .map_err(|e| ProbeError::Config(format!("failed to build HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    /// The checks `probe` runs before sending anything
    pub fn validate(target: &str, config: &HttpProbeConfig) -> Result<(), ProbeError> {
        normalize_url(target)?;
        parse_method(config.method.as_deref())?;
        build_headers(config)?;
        Ok(())
    }

    pub async fn probe(
        &self,
        monitor_id: MonitorId,
        target: &str,
        config: &HttpProbeConfig,
        timeout: Duration,
    ) -> Result<ProbeResult, ProbeError> {
        let url = normalize_url(target)?;
        let method = parse_method(config.method.as_deref())?;
        let headers = build_headers(config)?;
        let expected_status = config.expected_status.unwrap_or(DEFAULT_EXPECTED_STATUS);

        let timestamp = Utc::now();
        let start = Instant::now();

        let response = match self
            .client
            .request(method, url.clone())
            .headers(headers)
            .timeout(timeout)
            .send()
            .await
        {
            Ok(response) => response,
            Err(e) => {
                let latency = start.elapsed().as_millis() as u64;
                let message = if e.is_timeout() {
                    format!("request timed out after {}s", timeout.as_secs())
                } else {
                    error_chain(&e)
                };
                return Ok(ProbeResult::failed(monitor_id, timestamp, latency, message));
            }
        };

        let status = response.status().as_u16();
        let certificate_expiry = response
            .extensions()
            .get::<TlsInfo>()
            .and_then(|info| info.peer_certificate())
            .and_then(certificate_not_after);

        let body = match read_body_prefix(response).await {
            Ok(body) => body,
            Err(e) => {
                let latency = start.elapsed().as_millis() as u64;
                return Ok(ProbeResult::failed(
                    monitor_id,
                    timestamp,
                    latency,
                    format!("failed to read response body: {}", error_chain(&e)),
                )
                .with_status_code(status));
            }
        };
        let latency = start.elapsed().as_millis() as u64;

        let failure = if status != expected_status {
            Some(format!(
                "unexpected status code {}, expected {}",
                status, expected_status
            ))
        } else {
            match &config.expected_body {
                Some(needle) if !body.contains(needle.as_str()) => {
                    Some(format!("response body does not contain \"{}\"", needle))
                }
                _ => None,
            }
        };

        let mut result = match failure {
            Some(message) => ProbeResult::failed(monitor_id, timestamp, latency, message),
            None => ProbeResult::succeeded(monitor_id, timestamp, latency),
        }
        .with_status_code(status)
        .with_body(body);

        if let Some(warning) = certificate_expiry.and_then(|expiry| certificate_warning(expiry, timestamp)) {
            warn!(monitor_id, %url, "{}", warning);
            result = result.with_warning(warning);
        }

        debug!(monitor_id, status, latency, "HTTP probe complete");
        Ok(result)
    }
}

/// Prefix `http://` when the target carries no scheme
pub fn normalize_url(target: &str) -> Result<Url, ProbeError> {
    let target = target.trim();
    let candidate = if target.contains("://") {
        target.to_string()
    } else {
        format!("http://{}", target)
    };

    let url = Url::parse(&candidate)
        .map_err(|e| ProbeError::Config(format!("malformed target {:?}: {}", target, e)))?;

    match url.scheme() {
        "http" | "https" => Ok(url),
        scheme => Err(ProbeError::Config(format!(
            "unsupported URL scheme {:?} in target {:?}",
            scheme, target
        ))),
    }
}

fn parse_method(method: Option<&str>) -> Result<Method, ProbeError> {
    match method {
        None => Ok(Method::GET),
        Some(method) => Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes())
            .map_err(|_| ProbeError::Config(format!("invalid HTTP method {:?}", method))),
    }
}

fn build_headers(config: &HttpProbeConfig) -> Result<HeaderMap, ProbeError> {
    let mut headers = HeaderMap::with_capacity(config.headers.len());
    for (name, value) in &config.headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|_| ProbeError::Config(format!("invalid header name {:?}", name)))?;
        let value = HeaderValue::from_str(value)
            .map_err(|_| ProbeError::Config(format!("invalid value for header {}", name)))?;
        headers.insert(name, value);
    }
    Ok(headers)
}

/// Read at most [`MAX_BODY_BYTES`] of the body and drop the rest
async fn read_body_prefix(mut response: reqwest::Response) -> Result<String, reqwest::Error> {
    let mut buf: Vec<u8> = Vec::with_capacity(MAX_BODY_BYTES);

    while buf.len() < MAX_BODY_BYTES {
        match response.chunk().await? {
            Some(chunk) => buf.extend_from_slice(&chunk),
            None => break,
        }
    }

    buf.truncate(MAX_BODY_BYTES);
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

fn certificate_not_after(der: &[u8]) -> Option<DateTime<Utc>> {
    match x509_parser::parse_x509_certificate(der) {
        Ok((_, cert)) => DateTime::from_timestamp(cert.validity().not_after.timestamp(), 0),
        Err(e) => {
            debug!("could not parse peer certificate: {}", e);
            None
        }
    }
}

/// Warning text when a certificate expires within [`CERT_WARNING_DAYS`]
pub fn certificate_warning(not_after: DateTime<Utc>, now: DateTime<Utc>) -> Option<String> {
    let remaining = not_after - now;

    if remaining < chrono::Duration::zero() {
        Some(format!(
            "TLS certificate expired on {}",
            not_after.format("%Y-%m-%d")
        ))
    } else if remaining < chrono::Duration::days(CERT_WARNING_DAYS) {
        Some(format!(
            "TLS certificate expires in {} days (on {})",
            remaining.num_days(),
            not_after.format("%Y-%m-%d")
        ))
    } else {
        None
    }
}
