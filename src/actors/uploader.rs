//! UploaderActor - batches agent probe results and pushes them to the hub
//!
//! ## Message Flow
//!
//! ```text
//! AgentSink → Enqueue → buffer ──(batch_size reached | flush tick | Flush)──► POST /api/v1/agents/:id/reports
//!                         ▲                                                        │
//!                         └──────────────── requeue on failure ◄───────────────────┘
//! ```
//!
//! A failed upload puts the batch back at the front of the buffer. The buffer
//! is bounded; when the hub stays unreachable the oldest results are dropped.

use std::collections::VecDeque;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::{mpsc, oneshot};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, info, instrument, warn};

use crate::config::AgentConfig;
use crate::ingest::{AgentProbeItem, AgentReportBatch, IngestSummary};

use super::messages::UploaderCommand;

/// How many batches worth of results are kept while the hub is unreachable
const BUFFERED_BATCHES: usize = 20;

#[derive(Debug, Clone)]
pub struct UploaderSettings {
    pub endpoint: String,
    pub token: Option<String>,
    pub batch_size: usize,
    pub flush_interval: Duration,
    pub max_buffered: usize,
    /// Bound for one POST to the hub
    pub request_timeout: Duration,
}

impl UploaderSettings {
    pub fn new(hub_url: &str, agent_id: &str) -> Self {
        Self {
            endpoint: format!(
                "{}/api/v1/agents/{}/reports",
                hub_url.trim_end_matches('/'),
                agent_id
            ),
            token: None,
            batch_size: 50,
            flush_interval: Duration::from_secs(10),
            max_buffered: 50 * BUFFERED_BATCHES,
            request_timeout: Duration::from_secs(15),
        }
    }

    pub fn from_agent_config(config: &AgentConfig, agent_id: &str) -> Self {
        let batch_size = config.batch_size.max(1);
        Self {
            token: config.token.clone(),
            batch_size,
            flush_interval: Duration::from_secs(config.flush_interval_secs.max(1)),
            max_buffered: batch_size * BUFFERED_BATCHES,
            request_timeout: Duration::from_secs(config.upload_timeout_secs.max(1)),
            ..Self::new(&config.hub_url, agent_id)
        }
    }
}

pub struct UploaderActor {
    client: reqwest::Client,
    settings: UploaderSettings,
    buffer: VecDeque<AgentProbeItem>,
    command_rx: mpsc::Receiver<UploaderCommand>,
}

impl UploaderActor {
    pub fn new(
        settings: UploaderSettings,
        command_rx: mpsc::Receiver<UploaderCommand>,
    ) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(settings.request_timeout)
            .build()
            .context("failed to build upload client")?;

        Ok(Self {
            client,
            settings,
            buffer: VecDeque::new(),
            command_rx,
        })
    }

    #[instrument(skip(self), fields(endpoint = %self.settings.endpoint))]
    pub async fn run(mut self) {
        debug!("starting uploader actor");

        let period = self.settings.flush_interval;
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;

                command = self.command_rx.recv() => {
                    match command {
                        Some(UploaderCommand::Enqueue(item)) => {
                            self.push(item);
                            if self.buffer.len() >= self.settings.batch_size {
                                self.flush_logged().await;
                            }
                        }
                        Some(UploaderCommand::Flush { respond_to }) => {
                            let result = self.flush().await;
                            let _ = respond_to.send(result);
                        }
                        Some(UploaderCommand::Shutdown) | None => {
                            debug!("shutting down, final flush");
                            self.flush_logged().await;
                            break;
                        }
                    }
                }

                _ = ticker.tick() => {
                    self.flush_logged().await;
                }
            }
        }

        if !self.buffer.is_empty() {
            warn!(pending = self.buffer.len(), "uploader stopped with unsent results");
        }
        debug!("uploader actor stopped");
    }

    fn push(&mut self, item: AgentProbeItem) {
        self.buffer.push_back(item);
        self.trim_overflow();
    }

    fn trim_overflow(&mut self) {
        let overflow = self.buffer.len().saturating_sub(self.settings.max_buffered);
        if overflow > 0 {
            self.buffer.drain(..overflow);
            warn!(dropped = overflow, "upload buffer full, dropped oldest results");
        }
    }

    async fn flush_logged(&mut self) {
        if let Err(e) = self.flush().await {
            warn!("upload failed, will retry: {}", e);
        }
    }

    /// Upload the whole buffer in batches, stopping at the first failure
    async fn flush(&mut self) -> Result<usize, String> {
        let mut accepted = 0;

        while !self.buffer.is_empty() {
            let count = self.settings.batch_size.min(self.buffer.len());
            let items: Vec<_> = self.buffer.drain(..count).collect();

            match self.upload(&items).await {
                Ok(summary) => accepted += summary.accepted,
                Err(e) => {
                    for item in items.into_iter().rev() {
                        self.buffer.push_front(item);
                    }
                    self.trim_overflow();
                    return Err(format!("{:#}", e));
                }
            }
        }

        if accepted > 0 {
            debug!(accepted, "uploaded probe results");
        }
        Ok(accepted)
    }

    async fn upload(&self, items: &[AgentProbeItem]) -> Result<IngestSummary> {
        let batch = AgentReportBatch {
            items: items.to_vec(),
        };

        let mut request = self.client.post(&self.settings.endpoint).json(&batch);
        if let Some(token) = &self.settings.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .context("failed to reach hub")?
            .error_for_status()
            .context("hub rejected batch")?;

        response
            .json::<IngestSummary>()
            .await
            .context("failed to decode hub response")
    }
}

/// Handle for feeding an UploaderActor
#[derive(Clone)]
pub struct UploaderHandle {
    sender: mpsc::Sender<UploaderCommand>,
}

impl UploaderHandle {
    pub fn spawn(settings: UploaderSettings) -> Result<Self> {
        let (cmd_tx, cmd_rx) = mpsc::channel(256);
        info!(endpoint = %settings.endpoint, "starting result uploader");

        let actor = UploaderActor::new(settings, cmd_rx)?;
        tokio::spawn(actor.run());

        Ok(Self { sender: cmd_tx })
    }

    pub async fn enqueue(&self, item: AgentProbeItem) -> Result<()> {
        self.sender
            .send(UploaderCommand::Enqueue(item))
            .await
            .context("uploader stopped")?;
        Ok(())
    }

    /// Upload everything queued so far, returning how many results the hub accepted
    pub async fn flush(&self) -> Result<usize> {
        let (tx, rx) = oneshot::channel();
        self.sender
            .send(UploaderCommand::Flush { respond_to: tx })
            .await
            .context("uploader stopped")?;

        rx.await
            .context("uploader dropped flush request")?
            .map_err(anyhow::Error::msg)
    }

    pub async fn shutdown(self) {
        let _ = self.sender.send(UploaderCommand::Shutdown).await;
    }
}
