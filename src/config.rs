use std::net::SocketAddr;
use std::path::PathBuf;

use serde::{Deserialize, Deserializer};
use tracing::{trace, warn};

use crate::model::ServiceMonitor;

/// Storage backend configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "backend", rename_all = "lowercase")]
pub enum StorageConfig {
    /// In-memory storage (no persistence)
    #[serde(rename = "none")]
    None,

    /// SQLite database (default for most deployments)
    Sqlite {
        /// Path to the SQLite database file
        #[serde(default = "default_sqlite_path")]
        path: PathBuf,

        /// Probe results older than this are deleted, 0 keeps everything
        #[serde(default = "default_retention_days")]
        retention_days: u32,
    },
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig::Sqlite {
            path: default_sqlite_path(),
            retention_days: default_retention_days(),
        }
    }
}

fn default_sqlite_path() -> PathBuf {
    PathBuf::from("./sentinel.db")
}

fn default_retention_days() -> u32 {
    30
}

/// In-memory aggregation horizon of the sentinel
#[derive(Debug, Clone, Deserialize)]
pub struct SentinelConfig {
    #[serde(default = "default_sentinel_retention_days")]
    pub retention_days: u32,

    /// Width of one aggregation bucket
    #[serde(default = "default_bucket_secs")]
    pub bucket_secs: u64,

    /// Number of individual reports kept per monitor for trends
    #[serde(default = "default_recent_capacity")]
    pub recent_capacity: usize,

    /// Reports stamped further ahead of the hub clock than this are dropped
    #[serde(default = "default_max_clock_skew_secs")]
    pub max_clock_skew_secs: u64,
}

impl Default for SentinelConfig {
    fn default() -> Self {
        Self {
            retention_days: default_sentinel_retention_days(),
            bucket_secs: default_bucket_secs(),
            recent_capacity: default_recent_capacity(),
            max_clock_skew_secs: default_max_clock_skew_secs(),
        }
    }
}

fn default_sentinel_retention_days() -> u32 {
    30
}

fn default_bucket_secs() -> u64 {
    3600
}

fn default_recent_capacity() -> usize {
    64
}

fn default_max_clock_skew_secs() -> u64 {
    300
}

/// Window the failure evaluator reads before asking the alert engine
#[derive(Debug, Clone, Deserialize)]
pub struct EvaluatorConfig {
    #[serde(default = "default_lookback_secs")]
    pub lookback_secs: u64,

    /// Only the most recent results of the lookback are considered
    #[serde(default = "default_history_limit")]
    pub history_limit: usize,
}

impl Default for EvaluatorConfig {
    fn default() -> Self {
        Self {
            lookback_secs: default_lookback_secs(),
            history_limit: default_history_limit(),
        }
    }
}

fn default_lookback_secs() -> u64 {
    3600
}

fn default_history_limit() -> usize {
    1000
}

/// How often availability rollups are refreshed
#[derive(Debug, Clone, Deserialize)]
pub struct RollupConfig {
    #[serde(default = "default_rollup_interval_secs")]
    pub interval_secs: u64,
}

impl Default for RollupConfig {
    fn default() -> Self {
        Self {
            interval_secs: default_rollup_interval_secs(),
        }
    }
}

fn default_rollup_interval_secs() -> u64 {
    300
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Alert {
    Discord(Discord),
    Webhook(Webhook),
}

#[derive(Debug, Clone, Deserialize)]
pub struct Webhook {
    pub url: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Discord {
    pub url: String,
    pub user_id: Option<String>,
}

/// Where service alerts go and when they fire
#[derive(Debug, Clone, Deserialize)]
pub struct AlertingConfig {
    pub alert: Alert,

    /// Additionally fire when window availability drops below this percentage
    #[serde(default)]
    pub min_availability: Option<f64>,

    /// Upper bound for a single Discord or webhook delivery
    #[serde(default = "default_notify_timeout_secs")]
    pub timeout_secs: u64,
}

fn default_notify_timeout_secs() -> u64 {
    10
}

/// Hub HTTP API settings
#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: SocketAddr,

    /// Bearer token required on every request, falls back to `HUB_SECRET`
    #[serde(default)]
    pub auth_token: Option<String>,

    #[serde(default = "default_enable_cors")]
    pub enable_cors: bool,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            auth_token: None,
            enable_cors: default_enable_cors(),
        }
    }
}

fn default_bind_addr() -> SocketAddr {
    SocketAddr::from((crate::util::get_addr(), crate::util::get_port()))
}

fn default_enable_cors() -> bool {
    true
}

/// Hub configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default, deserialize_with = "deserialize_monitors")]
    pub monitors: Vec<ServiceMonitor>,

    /// Storage configuration (optional - defaults to SQLite)
    pub storage: Option<StorageConfig>,

    #[serde(default)]
    pub sentinel: SentinelConfig,

    #[serde(default)]
    pub evaluator: EvaluatorConfig,

    #[serde(default)]
    pub rollups: RollupConfig,

    pub alerting: Option<AlertingConfig>,

    #[serde(default)]
    pub api: ApiConfig,
}

/// Agent configuration file
#[derive(Debug, Clone, Deserialize)]
pub struct AgentConfig {
    /// Defaults to `AGENT_ID`, then the host name
    pub agent_id: Option<String>,

    /// Base URL of the hub, e.g. `http://hub.internal:51243`
    pub hub_url: String,

    /// Bearer token for the hub, falls back to `AGENT_SECRET`
    pub token: Option<String>,

    #[serde(default, deserialize_with = "deserialize_monitors")]
    pub monitors: Vec<ServiceMonitor>,

    #[serde(default = "default_batch_size")]
    pub batch_size: usize,

    #[serde(default = "default_flush_interval_secs")]
    pub flush_interval_secs: u64,

    /// Upper bound for a single upload to the hub
    #[serde(default = "default_upload_timeout_secs")]
    pub upload_timeout_secs: u64,
}

fn default_batch_size() -> usize {
    50
}

fn default_flush_interval_secs() -> u64 {
    10
}

fn default_upload_timeout_secs() -> u64 {
    15
}

/// Monitors with an unknown probe type or missing fields are logged and
/// skipped so one bad entry doesn't take the others down with it.
fn deserialize_monitors<'de, D>(deserializer: D) -> Result<Vec<ServiceMonitor>, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = Vec::<serde_json::Value>::deserialize(deserializer)?;

    Ok(raw
        .into_iter()
        .enumerate()
        .filter_map(|(index, value)| {
            let id = value.get("id").cloned();
            match serde_json::from_value::<ServiceMonitor>(value) {
                Ok(monitor) => Some(monitor),
                Err(e) => {
                    warn!("skipping monitor #{index} (id {id:?}): {e}");
                    None
                }
            }
        })
        .collect())
}

pub fn read_config_file(path: &str) -> anyhow::Result<Config> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid configuration file provided: {e}"))
        .inspect(|config| trace!("loaded config: {config:?}"))
}

pub fn read_agent_config_file(path: &str) -> anyhow::Result<AgentConfig> {
    let file_content = std::fs::read_to_string(path)?;
    serde_json::from_str(&file_content)
        .map_err(|e| anyhow::anyhow!("Invalid agent configuration file provided: {e}"))
        .inspect(|config| trace!("loaded agent config: {config:?}"))
}
