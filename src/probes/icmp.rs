//! ICMP echo probe
//!
//! Sends a burst of [`ICMP_BURST`] echo requests over a native socket and
//! reports the average round trip of the replies. Raw sockets are tried first
//! (root or `CAP_NET_RAW`), then unprivileged datagram sockets
//! (`net.ipv4.ping_group_range`), and finally the system `ping` binary.
//!
//! Socket I/O is blocking and runs on the blocking pool so that timing isn't
//! skewed by the async scheduler.

use std::io::{self, Read};
use std::net::{IpAddr, SocketAddr};
use std::process::Stdio;
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{LazyLock, OnceLock};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use regex::Regex;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::ProbeError;
use crate::model::{MonitorId, ProbeResult};

/// Echo requests per probe
pub const ICMP_BURST: usize = 5;

const ECHO_REQUEST_V4: u8 = 8;
const ECHO_REPLY_V4: u8 = 0;
const ECHO_REQUEST_V6: u8 = 128;
const ECHO_REPLY_V6: u8 = 129;

/// Time past its own `-w` deadline the `ping` binary gets to print the summary
const PING_SUMMARY_GRACE: Duration = Duration::from_millis(250);

static PING_SEQUENCE: AtomicU16 = AtomicU16::new(0);

static SOCKET_KIND: OnceLock<Option<SocketKind>> = OnceLock::new();

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SocketKind {
    Raw,
    Dgram,
}

impl SocketKind {
    fn socket_type(self) -> Type {
        match self {
            SocketKind::Raw => Type::RAW,
            SocketKind::Dgram => Type::DGRAM,
        }
    }
}

fn detect_socket_kind() -> Option<SocketKind> {
    if Socket::new(Domain::IPV4, Type::RAW, Some(Protocol::ICMPV4)).is_ok() {
        info!("ICMP probe: using raw sockets");
        return Some(SocketKind::Raw);
    }

    if Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::ICMPV4)).is_ok() {
        info!("ICMP probe: using unprivileged datagram sockets");
        return Some(SocketKind::Dgram);
    }

    info!("ICMP probe: native sockets unavailable, falling back to the ping command");
    None
}

/// Replies collected for one burst
#[derive(Debug, Clone, PartialEq)]
pub struct BurstOutcome {
    pub sent: usize,
    pub round_trips: Vec<Duration>,
}

impl BurstOutcome {
    fn received(&self) -> usize {
        self.round_trips.len()
    }

    fn loss_percent(&self) -> f64 {
        if self.sent == 0 {
            return 100.0;
        }
        (self.sent - self.received()) as f64 / self.sent as f64 * 100.0
    }

    fn average_ms(&self) -> Option<u64> {
        if self.round_trips.is_empty() {
            return None;
        }
        let total: Duration = self.round_trips.iter().sum();
        let avg = total.as_secs_f64() * 1000.0 / self.round_trips.len() as f64;
        Some(avg.round() as u64)
    }

    /// Turn the burst into a result: success iff at least one reply came back
    pub fn into_result(self, monitor_id: MonitorId, timestamp: DateTime<Utc>) -> ProbeResult {
        let loss = format!(
            "{:.0}% packet loss (sent {}, received {})",
            self.loss_percent(),
            self.sent,
            self.received()
        );

        match self.average_ms() {
            Some(latency) if self.received() < self.sent => {
                ProbeResult::succeeded(monitor_id, timestamp, latency).with_warning(loss)
            }
            Some(latency) => ProbeResult::succeeded(monitor_id, timestamp, latency),
            None => ProbeResult::failed(monitor_id, timestamp, 0, loss),
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct IcmpProbe;

impl IcmpProbe {
    pub fn validate(target: &str) -> Result<&str, ProbeError> {
        let target = target.trim();
        if target.is_empty() || target.contains(char::is_whitespace) {
            return Err(ProbeError::Config(format!(
                "invalid ICMP target {:?}",
                target
            )));
        }
        Ok(target)
    }

    pub async fn probe(
        &self,
        monitor_id: MonitorId,
        target: &str,
        timeout: Duration,
    ) -> Result<ProbeResult, ProbeError> {
        let target = Self::validate(target)?;
        let timestamp = Utc::now();
        // resolution, native burst and command fallback share one budget
        let deadline = Instant::now() + timeout;

        let ip = match resolve_within(target, timeout).await {
            Ok(ip) => ip,
            Err(message) => return Ok(ProbeResult::failed(monitor_id, timestamp, 0, message)),
        };

        if let Some(kind) = *SOCKET_KIND.get_or_init(detect_socket_kind) {
            let Some(remaining) = remaining_budget(deadline) else {
                return Ok(budget_exhausted(monitor_id, timestamp, timeout));
            };
            let burst = tokio::task::spawn_blocking(move || run_burst(ip, kind, remaining)).await;

            match burst {
                Ok(Ok(outcome)) => return Ok(outcome.into_result(monitor_id, timestamp)),
                Ok(Err(e)) => {
                    warn!(
                        monitor_id,
                        %ip, "native ICMP failed, falling back to ping command: {}", e
                    );
                }
                Err(e) => {
                    warn!(monitor_id, %ip, "ICMP burst task failed: {}", e);
                }
            }
        }

        let Some(remaining) = remaining_budget(deadline) else {
            return Ok(budget_exhausted(monitor_id, timestamp, timeout));
        };
        Ok(match run_ping_command(&ip.to_string(), remaining).await {
            Ok(outcome) => outcome.into_result(monitor_id, timestamp),
            Err(message) => ProbeResult::failed(monitor_id, timestamp, 0, message),
        })
    }
}

fn remaining_budget(deadline: Instant) -> Option<Duration> {
    Some(deadline.saturating_duration_since(Instant::now())).filter(|left| !left.is_zero())
}

fn budget_exhausted(monitor_id: MonitorId, timestamp: DateTime<Utc>, timeout: Duration) -> ProbeResult {
    let latency = (Utc::now() - timestamp).num_milliseconds().max(0) as u64;
    ProbeResult::failed(
        monitor_id,
        timestamp,
        latency,
        format!(
            "timed out after {}s (sent {}, received 0)",
            timeout.as_secs(),
            ICMP_BURST
        ),
    )
}

async fn resolve_within(target: &str, budget: Duration) -> Result<IpAddr, String> {
    tokio::time::timeout(budget, resolve_address(target))
        .await
        .map_err(|_| format!("resolving {} timed out after {}s", target, budget.as_secs()))?
}

async fn resolve_address(target: &str) -> Result<IpAddr, String> {
    if let Ok(ip) = target.parse::<IpAddr>() {
        return Ok(ip);
    }

    tokio::net::lookup_host(format!("{}:0", target))
        .await
        .map_err(|e| format!("failed to resolve {}: {}", target, e))?
        .next()
        .map(|addr| addr.ip())
        .ok_or_else(|| format!("no addresses found for {}", target))
}

/// Send the whole burst, then collect replies until all arrived or time ran out
fn run_burst(ip: IpAddr, kind: SocketKind, timeout: Duration) -> io::Result<BurstOutcome> {
    let (domain, protocol, request_type, reply_type) = match ip {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4, ECHO_REQUEST_V4, ECHO_REPLY_V4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6, ECHO_REQUEST_V6, ECHO_REPLY_V6),
    };

    let mut socket = Socket::new(domain, kind.socket_type(), Some(protocol))?;
    socket.set_write_timeout(Some(timeout))?;
    socket.connect(&SocketAddr::new(ip, 0).into())?;

    let identifier: u16 = rand::random();
    let first_sequence = PING_SEQUENCE.fetch_add(ICMP_BURST as u16, Ordering::Relaxed);
    let deadline = Instant::now() + timeout;

    let mut sent_at = Vec::with_capacity(ICMP_BURST);
    for offset in 0..ICMP_BURST {
        let sequence = first_sequence.wrapping_add(offset as u16);
        let packet = build_echo_request(request_type, identifier, sequence);
        sent_at.push(Instant::now());
        socket.send(&packet)?;
    }

    let mut round_trips: Vec<Option<Duration>> = vec![None; ICMP_BURST];
    let mut buf = [0u8; 1500];

    while round_trips.iter().any(Option::is_none) {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        socket.set_read_timeout(Some(remaining))?;

        let len = match socket.read(&mut buf) {
            Ok(len) => len,
            Err(e) if matches!(e.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut) => {
                break;
            }
            Err(e) => return Err(e),
        };
        let received_at = Instant::now();

        // Datagram sockets get their identifier rewritten by the kernel
        let expected_id = (kind == SocketKind::Raw).then_some(identifier);
        let Some(sequence) = parse_echo_reply(&buf[..len], reply_type, expected_id) else {
            continue;
        };

        let offset = sequence.wrapping_sub(first_sequence) as usize;
        if offset < ICMP_BURST && round_trips[offset].is_none() {
            round_trips[offset] = Some(received_at.duration_since(sent_at[offset]));
        }
    }

    let outcome = BurstOutcome {
        sent: ICMP_BURST,
        round_trips: round_trips.into_iter().flatten().collect(),
    };
    debug!(%ip, received = outcome.received(), "ICMP burst complete");
    Ok(outcome)
}

/// Echo request with an 8 byte header and 56 byte payload (type, code 0)
fn build_echo_request(request_type: u8, identifier: u16, sequence: u16) -> Vec<u8> {
    let mut packet = vec![0u8; 64];

    packet[0] = request_type;
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());
    for (i, byte) in packet[8..].iter_mut().enumerate() {
        *byte = i as u8;
    }

    // ICMPv6 checksums cover a pseudo header and are filled in by the kernel
    if request_type == ECHO_REQUEST_V4 {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Internet checksum (RFC 1071)
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = data
        .chunks(2)
        .map(|pair| match pair {
            [hi, lo] => u16::from_be_bytes([*hi, *lo]) as u32,
            [hi] => (*hi as u32) << 8,
            _ => 0,
        })
        .sum();

    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !(sum as u16)
}

/// Sequence number of an echo reply, skipping an IPv4 header if present
fn parse_echo_reply(data: &[u8], reply_type: u8, identifier: Option<u16>) -> Option<u16> {
    let offset = match data.first() {
        Some(first) if first >> 4 == 4 => ((first & 0x0F) as usize) * 4,
        _ => 0,
    };

    let icmp = data.get(offset..offset + 8)?;
    if icmp[0] != reply_type {
        return None;
    }

    let reply_id = u16::from_be_bytes([icmp[4], icmp[5]]);
    if identifier.is_some_and(|id| id != reply_id) {
        return None;
    }

    Some(u16::from_be_bytes([icmp[6], icmp[7]]))
}

async fn run_ping_command(address: &str, timeout: Duration) -> Result<BurstOutcome, String> {
    let mut command = Command::new("ping");
    command
        .arg("-n")
        .arg("-c")
        .arg(ICMP_BURST.to_string())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    #[cfg(target_os = "linux")]
    command.arg("-w").arg(timeout.as_secs().max(1).to_string());
    command.arg(address);

    let output = tokio::time::timeout(timeout + PING_SUMMARY_GRACE, command.output())
        .await
        .map_err(|_| {
            format!(
                "ping timed out after {}s (sent {}, received 0)",
                timeout.as_secs(),
                ICMP_BURST
            )
        })?
        .map_err(|e| format!("failed to execute ping: {}", e))?;

    let stdout = String::from_utf8_lossy(&output.stdout);
    parse_ping_output(&stdout).ok_or_else(|| {
        let stderr = String::from_utf8_lossy(&output.stderr);
        format!("ping failed: {}", stderr.trim())
    })
}

static TRANSMITTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?P<sent>\d+) packets transmitted, (?P<received>\d+) (?:packets )?received")
        .expect("static regex")
});

static SUMMARY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:rtt|round-trip) min/avg/max/(?:mdev|stddev) = [0-9.]+/(?P<avg>[0-9.]+)/")
        .expect("static regex")
});

static REPLY_TIME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"time[=<](?P<ms>[0-9.]+)\s*ms").expect("static regex"));

/// Parse Linux or BSD `ping` output into a burst outcome
///
/// Only the average is reported by the summary line, so every reply is
/// assigned the average round trip.
fn parse_ping_output(output: &str) -> Option<BurstOutcome> {
    let stats = TRANSMITTED.captures(output)?;
    let sent: usize = stats["sent"].parse().ok()?;
    let received: usize = stats["received"].parse().ok()?;

    let average_ms = SUMMARY
        .captures(output)
        .and_then(|caps| caps["avg"].parse::<f64>().ok())
        .or_else(|| {
            let times: Vec<f64> = REPLY_TIME
                .captures_iter(output)
                .filter_map(|caps| caps["ms"].parse::<f64>().ok())
                .collect();
            (!times.is_empty()).then(|| times.iter().sum::<f64>() / times.len() as f64)
        });

    let round_trips = match average_ms {
        Some(ms) if received > 0 => vec![Duration::from_secs_f64(ms / 1000.0); received],
        _ => Vec::new(),
    };

    Some(BurstOutcome { sent, round_trips })
}
