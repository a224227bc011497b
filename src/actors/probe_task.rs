//! ProbeTaskActor - the recurring firing of one monitor
//!
//! ## Message Flow
//!
//! ```text
//! Timer tick → spawn(fire) → ProbeExecutor → ResultSink (persist → sentinel → evaluator)
//!     ↑
//!     └─── Commands (Shutdown)
//! ```
//!
//! Each firing runs in its own tokio task. Stopping the actor only prevents
//! future ticks; a probe already in flight completes and is still delivered
//! to the sink.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{RwLock, mpsc};
use tokio::time::{Instant, MissedTickBehavior, interval_at};
use tracing::{debug, instrument, warn};

use crate::model::{ProbeResult, ServiceMonitor};
use crate::probes::{ProbeError, ProbeExecutor};
use crate::scheduler::ResultSink;

use super::messages::TaskCommand;

/// When a task last fired and when it fires next
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TaskTiming {
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

/// Execute one probe and hand the outcome to the sink
///
/// Shared by scheduled ticks and manual triggers. Configuration errors are
/// returned before anything reaches the sink.
pub(crate) async fn fire(
    executor: &ProbeExecutor,
    monitor: &ServiceMonitor,
    sink: &dyn ResultSink,
) -> Result<ProbeResult, ProbeError> {
    let result = executor.execute(monitor).await?;
    sink.handle(monitor, &result).await;
    Ok(result)
}

pub struct ProbeTaskActor {
    monitor: Arc<ServiceMonitor>,
    period: Duration,
    executor: Arc<ProbeExecutor>,
    sink: Arc<dyn ResultSink>,
    timing: Arc<RwLock<TaskTiming>>,
    command_rx: mpsc::Receiver<TaskCommand>,
}

impl ProbeTaskActor {
    fn next_run_after(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        chrono::Duration::from_std(self.period)
            .ok()
            .map(|period| now + period)
    }

    /// Tick until shut down or until the handle is dropped
    ///
    /// The first firing happens one period after the task was spawned.
    #[instrument(skip(self), fields(monitor_id = self.monitor.id, monitor = %self.monitor.name))]
    pub async fn run(mut self) {
        debug!(period = ?self.period, "starting probe task");

        let mut ticker = interval_at(Instant::now() + self.period, self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        self.timing.write().await.next_run = self.next_run_after(Utc::now());

        loop {
            tokio::select! {
                biased;

                command = self.command_rx.recv() => {
                    match command {
                        Some(TaskCommand::Shutdown) => {
                            debug!("received shutdown command");
                        }
                        None => {
                            debug!("task handle dropped");
                        }
                    }
                    break;
                }

                _ = ticker.tick() => {
                    let now = Utc::now();
                    {
                        let mut timing = self.timing.write().await;
                        timing.last_run = Some(now);
                        timing.next_run = self.next_run_after(now);
                    }

                    let executor = Arc::clone(&self.executor);
                    let monitor = Arc::clone(&self.monitor);
                    let sink = Arc::clone(&self.sink);
                    tokio::spawn(async move {
                        if let Err(e) = fire(&executor, &monitor, sink.as_ref()).await {
                            warn!(monitor_id = monitor.id, "skipping tick: {}", e);
                        }
                    });
                }
            }
        }

        debug!("probe task stopped");
    }
}

/// Handle for controlling a ProbeTaskActor
///
/// Dropping the handle stops the actor as well.
pub struct ProbeTaskHandle {
    sender: mpsc::Sender<TaskCommand>,
    timing: Arc<RwLock<TaskTiming>>,
}

impl ProbeTaskHandle {
    /// Spawn the recurring firing of `monitor` every `period`
    pub fn spawn(
        monitor: Arc<ServiceMonitor>,
        period: Duration,
        executor: Arc<ProbeExecutor>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        let (cmd_tx, cmd_rx) = mpsc::channel(4);
        let timing = Arc::new(RwLock::new(TaskTiming::default()));

        let actor = ProbeTaskActor {
            monitor,
            period,
            executor,
            sink,
            timing: Arc::clone(&timing),
            command_rx: cmd_rx,
        };

        tokio::spawn(actor.run());

        Self {
            sender: cmd_tx,
            timing,
        }
    }

    pub async fn timing(&self) -> TaskTiming {
        *self.timing.read().await
    }

    /// Stop future firings
    pub fn stop(self) {
        // a full channel or a finished actor both mean nothing more will fire
        let _ = self.sender.try_send(TaskCommand::Shutdown);
    }
}
