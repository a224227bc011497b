//! Scheduler - turns monitor definitions into live recurring probe tasks
//!
//! ```text
//!  admin calls ──► schedule / unschedule ──┐
//!                                          ▼
//!  start() ──► bootstrap task ──────► TaskTable ──► ProbeTaskActor (one per monitor)
//!                                                      │ tick
//!                                                      ▼
//!                                  ProbeExecutor ──► ResultSink
//! ```
//!
//! All bookkeeping lives in one [`TaskTable`] behind a single `RwLock`. A
//! replace or remove happens under the write lock together with starting or
//! stopping the actor, so concurrent schedule and unschedule calls for the
//! same monitor can never leave an orphaned task behind.
//!
//! ## Bootstrap
//!
//! `start()` loads every enabled monitor in a background task. Until that
//! task is done the table remembers which ids an admin call has touched, and
//! bootstrap skips those ids: whatever the admin call decided wins.

pub mod schedule;
pub mod sink;

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::actors::probe_task::{ProbeTaskHandle, fire};
use crate::model::{MonitorId, ProbeResult, ProbeType, ServiceMonitor};
use crate::probes::{ProbeError, ProbeExecutor};
use crate::sentinel::{MonitorSummary, ServiceSentinel};
use crate::storage::{MonitorRepository, StorageError};

pub use schedule::ScheduleSpec;
pub use sink::{AgentSink, HubPipeline, ResultSink};

#[derive(Debug)]
pub enum SchedulerError {
    /// The monitor definition or its probe configuration is unusable
    InvalidMonitor(String),

    /// No schedule can be derived from the monitor's interval
    InvalidSchedule(String),

    NotFound(MonitorId),

    Storage(StorageError),
}

impl fmt::Display for SchedulerError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SchedulerError::InvalidMonitor(msg) => write!(f, "invalid monitor: {}", msg),
            SchedulerError::InvalidSchedule(msg) => write!(f, "invalid schedule: {}", msg),
            SchedulerError::NotFound(id) => write!(f, "monitor {} not found", id),
            SchedulerError::Storage(err) => write!(f, "storage error: {}", err),
        }
    }
}

impl std::error::Error for SchedulerError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            SchedulerError::Storage(err) => Some(err),
            _ => None,
        }
    }
}

impl From<StorageError> for SchedulerError {
    fn from(err: StorageError) -> Self {
        SchedulerError::Storage(err)
    }
}

impl From<ProbeError> for SchedulerError {
    fn from(err: ProbeError) -> Self {
        match err {
            ProbeError::Config(msg) => SchedulerError::InvalidMonitor(msg),
        }
    }
}

/// A live recurring task
struct ProbeTask {
    monitor: Arc<ServiceMonitor>,
    schedule: ScheduleSpec,
    handle: ProbeTaskHandle,
}

impl ProbeTask {
    async fn info(&self) -> TaskInfo {
        let timing = self.handle.timing().await;
        TaskInfo {
            monitor_id: self.monitor.id,
            name: self.monitor.name.clone(),
            probe_type: self.monitor.probe_type(),
            target: self.monitor.target.clone(),
            schedule: self.schedule,
            period_secs: self.schedule.period().as_secs(),
            last_run: timing.last_run,
            next_run: timing.next_run,
        }
    }
}

/// Externally visible state of a scheduled task
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskInfo {
    pub monitor_id: MonitorId,
    pub name: String,
    pub probe_type: ProbeType,
    pub target: String,
    pub schedule: ScheduleSpec,
    pub period_secs: u64,
    pub last_run: Option<DateTime<Utc>>,
    pub next_run: Option<DateTime<Utc>>,
}

/// Monitor id → task, plus the ids touched while bootstrap runs
#[derive(Default)]
struct TaskTable {
    tasks: HashMap<MonitorId, ProbeTask>,
    touched: Option<HashSet<MonitorId>>,
}

impl TaskTable {
    fn get(&self, id: MonitorId) -> Option<&ProbeTask> {
        self.tasks.get(&id)
    }

    /// Insert the task built by `make` unless `id` is already present
    fn put_if_absent(&mut self, id: MonitorId, make: impl FnOnce() -> ProbeTask) -> bool {
        if self.tasks.contains_key(&id) {
            return false;
        }
        self.tasks.insert(id, make());
        true
    }

    fn replace(&mut self, task: ProbeTask) -> Option<ProbeTask> {
        self.tasks.insert(task.monitor.id, task)
    }

    fn remove(&mut self, id: MonitorId) -> Option<ProbeTask> {
        self.tasks.remove(&id)
    }

    fn touch(&mut self, id: MonitorId) {
        if let Some(touched) = &mut self.touched {
            touched.insert(id);
        }
    }

    fn touched_during_bootstrap(&self, id: MonitorId) -> bool {
        self.touched.as_ref().is_some_and(|t| t.contains(&id))
    }
}

pub struct Scheduler {
    executor: Arc<ProbeExecutor>,
    sink: Arc<dyn ResultSink>,
    repository: Arc<dyn MonitorRepository>,
    sentinel: Option<Arc<ServiceSentinel>>,
    table: RwLock<TaskTable>,
    bootstrap: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(
        executor: Arc<ProbeExecutor>,
        sink: Arc<dyn ResultSink>,
        repository: Arc<dyn MonitorRepository>,
    ) -> Self {
        Self {
            executor,
            sink,
            repository,
            sentinel: None,
            table: RwLock::new(TaskTable::default()),
            bootstrap: Mutex::new(None),
        }
    }

    /// Sentinel that backs [`Scheduler::overview`]
    pub fn with_sentinel(mut self, sentinel: Arc<ServiceSentinel>) -> Self {
        self.sentinel = Some(sentinel);
        self
    }

    /// Every check a monitor has to pass before it gets a task
    ///
    /// Returns the derived schedule without starting anything.
    pub fn validate_monitor(&self, monitor: &ServiceMonitor) -> Result<ScheduleSpec, SchedulerError> {
        let schedule = ScheduleSpec::from_interval(monitor.interval)?;
        monitor.validate().map_err(SchedulerError::InvalidMonitor)?;
        self.executor.validate(monitor)?;
        Ok(schedule)
    }

    fn spawn_task(&self, monitor: Arc<ServiceMonitor>, schedule: ScheduleSpec) -> ProbeTask {
        let handle = ProbeTaskHandle::spawn(
            Arc::clone(&monitor),
            schedule.period(),
            Arc::clone(&self.executor),
            Arc::clone(&self.sink),
        );
        ProbeTask {
            monitor,
            schedule,
            handle,
        }
    }

    /// Schedule a monitor, replacing any task it already has
    ///
    /// Disabled monitors are unscheduled instead.
    #[instrument(skip(self, monitor), fields(monitor_id = monitor.id))]
    pub async fn schedule_monitor(&self, monitor: ServiceMonitor) -> Result<(), SchedulerError> {
        // a disabled monitor must come off the table even if its edited
        // definition no longer validates
        if !monitor.enabled {
            debug!("monitor disabled, unscheduling");
            self.unschedule_monitor(monitor.id).await;
            return Ok(());
        }

        let schedule = self.validate_monitor(&monitor)?;

        let mut table = self.table.write().await;
        table.touch(monitor.id);
        let task = self.spawn_task(Arc::new(monitor), schedule);
        if let Some(previous) = table.replace(task) {
            debug!("replaced previous task");
            previous.handle.stop();
        }

        info!(%schedule, "monitor scheduled");
        Ok(())
    }

    /// Same as [`Scheduler::schedule_monitor`]; the old task is stopped first
    /// and the new one starts counting its period from now.
    pub async fn reschedule_monitor(&self, monitor: ServiceMonitor) -> Result<(), SchedulerError> {
        self.schedule_monitor(monitor).await
    }

    /// Stop future firings of a monitor. Unknown ids are a no-op.
    #[instrument(skip(self))]
    pub async fn unschedule_monitor(&self, monitor_id: MonitorId) -> bool {
        let mut table = self.table.write().await;
        table.touch(monitor_id);
        match table.remove(monitor_id) {
            Some(task) => {
                task.handle.stop();
                info!("monitor unscheduled");
                true
            }
            None => false,
        }
    }

    /// Probe a monitor right now, outside of its schedule
    ///
    /// The result goes through the sink like a scheduled one, but the task's
    /// `last_run`/`next_run` stay untouched. Monitors without a task are
    /// looked up in the repository.
    #[instrument(skip(self))]
    pub async fn trigger_manual_probe(
        &self,
        monitor_id: MonitorId,
    ) -> Result<ProbeResult, SchedulerError> {
        let scheduled = self
            .table
            .read()
            .await
            .get(monitor_id)
            .map(|task| Arc::clone(&task.monitor));

        let monitor = match scheduled {
            Some(monitor) => monitor,
            None => Arc::new(
                self.repository
                    .get_monitor(monitor_id)
                    .await?
                    .ok_or(SchedulerError::NotFound(monitor_id))?,
            ),
        };

        Ok(fire(&self.executor, &monitor, self.sink.as_ref()).await?)
    }

    /// All scheduled tasks, ordered by monitor id
    pub async fn list_tasks(&self) -> Vec<TaskInfo> {
        let table = self.table.read().await;
        let mut tasks = Vec::with_capacity(table.tasks.len());
        for task in table.tasks.values() {
            tasks.push(task.info().await);
        }
        tasks.sort_by_key(|t| t.monitor_id);
        tasks
    }

    pub async fn task_status(&self, monitor_id: MonitorId) -> Option<TaskInfo> {
        let table = self.table.read().await;
        match table.get(monitor_id) {
            Some(task) => Some(task.info().await),
            None => None,
        }
    }

    pub async fn task_count(&self) -> usize {
        self.table.read().await.tasks.len()
    }

    /// Sentinel summaries of every monitor with reports
    pub async fn overview(&self) -> Vec<MonitorSummary> {
        match &self.sentinel {
            Some(sentinel) => sentinel.snapshot().await,
            None => Vec::new(),
        }
    }

    /// Start the background bootstrap of all enabled monitors
    ///
    /// Returns immediately; admin calls may run while bootstrap is going on.
    pub async fn start(self: &Arc<Self>) {
        let mut bootstrap = self.bootstrap.lock().await;
        if bootstrap.is_some() {
            warn!("scheduler already started");
            return;
        }

        self.table.write().await.touched = Some(HashSet::new());

        let scheduler = Arc::clone(self);
        *bootstrap = Some(tokio::spawn(async move { scheduler.run_bootstrap().await }));
    }

    #[instrument(skip(self))]
    async fn run_bootstrap(&self) {
        let monitors = match self.repository.list_enabled_monitors().await {
            Ok(monitors) => monitors,
            Err(e) => {
                warn!("failed to load monitors, nothing scheduled at startup: {}", e);
                Vec::new()
            }
        };

        let mut scheduled = 0;
        for monitor in monitors {
            let monitor_id = monitor.id;
            let schedule = match self.validate_monitor(&monitor) {
                Ok(schedule) => schedule,
                Err(e) => {
                    warn!(monitor_id, "skipping monitor: {}", e);
                    continue;
                }
            };

            let mut table = self.table.write().await;
            if table.touched_during_bootstrap(monitor_id) {
                debug!(monitor_id, "changed by an admin call during startup, skipping");
                continue;
            }

            let monitor = Arc::new(monitor);
            if table.put_if_absent(monitor_id, || self.spawn_task(monitor, schedule)) {
                scheduled += 1;
            }
        }

        self.table.write().await.touched = None;
        info!(scheduled, "bootstrap finished");
    }

    /// Wait for the bootstrap task, if one is running
    pub async fn wait_for_bootstrap(&self) {
        let handle = self.bootstrap.lock().await.take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                if !e.is_cancelled() {
                    warn!("bootstrap task failed: {}", e);
                }
            }
        }
    }

    /// Abort bootstrap and stop every task
    ///
    /// Probes already in flight still complete and reach the sink.
    pub async fn stop(&self) {
        if let Some(handle) = self.bootstrap.lock().await.take() {
            handle.abort();
        }

        let mut table = self.table.write().await;
        let count = table.tasks.len();
        for (_, task) in table.tasks.drain() {
            task.handle.stop();
        }
        table.touched = None;
        info!(tasks = count, "scheduler stopped");
    }
}
