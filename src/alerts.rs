//! Alert engine seam and the notifying implementation used by the hub

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Serialize;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::{debug, error, info, instrument, warn};

use crate::config::{Alert, AlertingConfig, Webhook};
use crate::discord::{DiscordManager, MessageBuilder};
use crate::model::{MonitorId, ServiceAvailability, ServiceMonitor};
use crate::storage::{MonitorRepository, ResultQuery, StorageError};

#[derive(Debug)]
pub enum AlertError {
    Storage(StorageError),
}

impl fmt::Display for AlertError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AlertError::Storage(err) => write!(f, "alert rule lookup failed: {}", err),
        }
    }
}

impl std::error::Error for AlertError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AlertError::Storage(err) => Some(err),
        }
    }
}

impl From<StorageError> for AlertError {
    fn from(err: StorageError) -> Self {
        AlertError::Storage(err)
    }
}

/// Receives availability snapshots and decides whether anyone gets paged
#[async_trait]
pub trait AlertEngine: Send + Sync {
    async fn evaluate_service_rules(
        &self,
        monitor_id: MonitorId,
        availability: &ServiceAvailability,
    ) -> Result<(), AlertError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertTransition {
    Firing,
    Resolved,
}

impl AlertTransition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertTransition::Firing => "firing",
            AlertTransition::Resolved => "resolved",
        }
    }
}

/// Current alert state of one monitor
#[derive(Debug, Clone, Serialize)]
pub struct AlertState {
    pub firing: bool,
    pub since: DateTime<Utc>,
    pub last_evaluation: DateTime<Utc>,
}

/// Hysteresis: only state changes produce a notification
pub fn next_transition(firing: bool, breached: bool) -> Option<AlertTransition> {
    match (firing, breached) {
        (false, true) => Some(AlertTransition::Firing),
        (true, false) => Some(AlertTransition::Resolved),
        _ => None,
    }
}

/// Whether a window violates the monitor's rule
pub fn is_breached(
    monitor: &ServiceMonitor,
    availability: &ServiceAvailability,
    min_availability: Option<f64>,
) -> bool {
    let too_many_failures = availability.failed_checks >= u64::from(monitor.failure_threshold.max(1));
    let too_unavailable = min_availability
        .is_some_and(|min| availability.total_checks > 0 && availability.availability < min);
    too_many_failures || too_unavailable
}

/// Tracks firing/resolved state per monitor and notifies on transitions
///
/// Rules come from the monitor itself (`failure_threshold`) plus an optional
/// global minimum availability. Without a configured channel transitions are
/// only logged.
pub struct NotifyingAlertEngine {
    client: Client,
    config: Option<AlertingConfig>,
    repository: Arc<dyn MonitorRepository>,
    discord_manager: DiscordManager,
    states: RwLock<HashMap<MonitorId, AlertState>>,
    muted_until: RwLock<Option<DateTime<Utc>>>,
}

/// Delivery bound when no channel is configured
const DEFAULT_NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

impl NotifyingAlertEngine {
    pub fn new(
        repository: Arc<dyn MonitorRepository>,
        config: Option<AlertingConfig>,
    ) -> Result<Self, reqwest::Error> {
        let timeout = config
            .as_ref()
            .map_or(DEFAULT_NOTIFY_TIMEOUT, |c| Duration::from_secs(c.timeout_secs.max(1)));
        let client = Client::builder().timeout(timeout).build()?;

        Ok(Self {
            discord_manager: DiscordManager::new(client.clone()),
            client,
            config,
            repository,
            states: RwLock::new(HashMap::new()),
            muted_until: RwLock::new(None),
        })
    }

    /// Suppress notifications (state keeps being tracked) until `until`
    pub async fn mute_until(&self, until: DateTime<Utc>) {
        info!("muting service alerts until {}", until);
        *self.muted_until.write().await = Some(until);
    }

    pub async fn unmute(&self) {
        info!("unmuting service alerts");
        *self.muted_until.write().await = None;
    }

    pub async fn is_muted(&self) -> bool {
        self.muted_until
            .read()
            .await
            .is_some_and(|until| Utc::now() < until)
    }

    pub async fn alert_state(&self, monitor_id: MonitorId) -> Option<AlertState> {
        self.states.read().await.get(&monitor_id).cloned()
    }

    async fn apply(&self, monitor_id: MonitorId, breached: bool) -> Option<AlertTransition> {
        let now = Utc::now();
        let mut states = self.states.write().await;
        let state = states.entry(monitor_id).or_insert_with(|| AlertState {
            firing: false,
            since: now,
            last_evaluation: now,
        });

        state.last_evaluation = now;
        let transition = next_transition(state.firing, breached);
        if transition.is_some() {
            state.firing = breached;
            state.since = now;
        }
        transition
    }

    async fn last_error(&self, monitor_id: MonitorId, availability: &ServiceAvailability) -> Option<String> {
        let query = ResultQuery::new(monitor_id, availability.start_time, availability.end_time)
            .with_limit(1);
        match self.repository.query_results(query).await {
            Ok(results) => results.into_iter().next().and_then(|r| r.error_message),
            Err(e) => {
                debug!(monitor_id, "could not load last error: {}", e);
                None
            }
        }
    }

    #[instrument(skip(self, monitor, availability), fields(monitor_id = monitor.id))]
    async fn notify(
        &self,
        monitor: &ServiceMonitor,
        availability: &ServiceAvailability,
        transition: AlertTransition,
    ) {
        let last_error = match transition {
            AlertTransition::Firing => self.last_error(monitor.id, availability).await,
            AlertTransition::Resolved => None,
        };

        let Some(config) = &self.config else {
            info!(
                monitor = %monitor.name,
                transition = transition.as_str(),
                availability = availability.availability,
                "service alert (no channel configured)"
            );
            return;
        };

        match &config.alert {
            Alert::Discord(discord) => {
                let embed = self.discord_manager.build_service_embed(
                    monitor,
                    availability,
                    transition,
                    last_error.as_deref(),
                );

                let mut message_builder = MessageBuilder::new().add_embed(embed);
                if let Some(user_id) = &discord.user_id {
                    let emoji = match transition {
                        AlertTransition::Firing => "🔴",
                        AlertTransition::Resolved => "✅",
                    };
                    message_builder = message_builder.content(format!(
                        "{} Service: `{}` <@{user_id}>",
                        emoji, monitor.name
                    ));
                }

                self.discord_manager
                    .send_message(discord, &message_builder.build())
                    .await;
            }
            Alert::Webhook(webhook) => {
                self.send_webhook_alert(webhook, monitor, availability, transition, last_error.as_deref())
                    .await;
            }
        }
    }

    async fn send_webhook_alert(
        &self,
        webhook: &Webhook,
        monitor: &ServiceMonitor,
        availability: &ServiceAvailability,
        transition: AlertTransition,
        last_error: Option<&str>,
    ) {
        let message = match transition {
            AlertTransition::Firing => format!(
                "🔴 **Service Failing**: `{}` failed {} of {} checks ({:.2}% available)",
                monitor.name,
                availability.failed_checks,
                availability.total_checks,
                availability.availability
            ),
            AlertTransition::Resolved => {
                format!("✅ **Service Recovered**: `{}` is healthy again", monitor.name)
            }
        };

        let payload = json!({
            "message": message,
            "monitor_id": monitor.id,
            "monitor": monitor.name,
            "target": monitor.target,
            "status": transition.as_str(),
            "availability": availability.availability,
            "failed_checks": availability.failed_checks,
            "total_checks": availability.total_checks,
            "window_start": availability.start_time.to_rfc3339(),
            "window_end": availability.end_time.to_rfc3339(),
            "error": last_error,
            "timestamp": Utc::now().to_rfc3339()
        });

        match self.client.post(&webhook.url).json(&payload).send().await {
            Ok(response) => {
                if response.status().is_success() {
                    info!("Successfully sent service webhook alert");
                } else {
                    error!(
                        "Service webhook alert failed with status: {}",
                        response.status()
                    );
                }
            }
            Err(e) => {
                error!("Failed to send service webhook alert: {}", e);
            }
        }
    }
}

#[async_trait]
impl AlertEngine for NotifyingAlertEngine {
    async fn evaluate_service_rules(
        &self,
        monitor_id: MonitorId,
        availability: &ServiceAvailability,
    ) -> Result<(), AlertError> {
        let Some(monitor) = self.repository.get_monitor(monitor_id).await? else {
            warn!(monitor_id, "no rule for unknown monitor");
            return Ok(());
        };

        let min_availability = self.config.as_ref().and_then(|c| c.min_availability);
        let breached = is_breached(&monitor, availability, min_availability);

        let Some(transition) = self.apply(monitor_id, breached).await else {
            return Ok(());
        };

        if self.is_muted().await {
            info!(
                monitor_id,
                transition = transition.as_str(),
                "alert transition while muted, not notifying"
            );
            return Ok(());
        }

        self.notify(&monitor, availability, transition).await;
        Ok(())
    }
}
