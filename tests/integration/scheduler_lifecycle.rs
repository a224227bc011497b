//! Integration tests for scheduling, rescheduling and bootstrap
//!
//! Most tests run on a paused tokio clock; sleeping advances virtual time so
//! ticks fire without waiting in real time.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use service_sentinel::{
    probes::ProbeExecutor,
    scheduler::{ScheduleSpec, Scheduler, SchedulerError},
    storage::MemoryRepository,
};

use crate::helpers::{RecordingSink, closed_port, tcp_monitor};

fn scheduler(sink: Arc<RecordingSink>, repository: Arc<MemoryRepository>) -> Arc<Scheduler> {
    Arc::new(Scheduler::new(
        Arc::new(ProbeExecutor::new().unwrap()),
        sink,
        repository,
    ))
}

#[tokio::test(start_paused = true)]
async fn test_first_firing_after_one_period() {
    let sink = Arc::new(RecordingSink::default());
    let scheduler = scheduler(sink.clone(), Arc::new(MemoryRepository::new()));
    let target = closed_port().await;

    scheduler.schedule_monitor(tcp_monitor(1, &target)).await.unwrap();

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(sink.count().await, 0);

    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(sink.wait_for(1, 100).await >= 1);

    let info = scheduler.task_status(1).await.unwrap();
    assert!(info.last_run.is_some());
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_probe_failures_do_not_stop_ticks() {
    let sink = Arc::new(RecordingSink::default());
    let scheduler = scheduler(sink.clone(), Arc::new(MemoryRepository::new()));
    let target = closed_port().await;

    scheduler.schedule_monitor(tcp_monitor(1, &target)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(35)).await;

    assert!(sink.wait_for(3, 100).await >= 3);
    assert!(sink.results.lock().await.iter().all(|r| !r.success));
    scheduler.stop().await;
}

#[tokio::test]
async fn test_reschedule_leaves_one_task() {
    let sink = Arc::new(RecordingSink::default());
    let scheduler = scheduler(sink, Arc::new(MemoryRepository::new()));

    scheduler.schedule_monitor(tcp_monitor(7, "db:5432")).await.unwrap();
    let mut changed = tcp_monitor(7, "db:5433");
    changed.interval = 90;
    scheduler.reschedule_monitor(changed).await.unwrap();

    let tasks = scheduler.list_tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].target, "db:5433");
    assert_eq!(tasks[0].schedule, ScheduleSpec::Minutes(1));
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_repeated_scheduling_fires_once_per_period() {
    let sink = Arc::new(RecordingSink::default());
    let scheduler = scheduler(sink.clone(), Arc::new(MemoryRepository::new()));
    let target = closed_port().await;

    for _ in 0..3 {
        scheduler.schedule_monitor(tcp_monitor(1, &target)).await.unwrap();
    }
    assert_eq!(scheduler.task_count().await, 1);

    // ticks at 10s, 20s and 30s from the one surviving task
    tokio::time::sleep(Duration::from_secs(35)).await;
    assert_eq!(sink.wait_for(3, 100).await, 3);
    scheduler.stop().await;
}

#[tokio::test]
async fn test_unschedule_unknown_id_is_noop() {
    let sink = Arc::new(RecordingSink::default());
    let scheduler = scheduler(sink, Arc::new(MemoryRepository::new()));
    scheduler.schedule_monitor(tcp_monitor(1, "db:5432")).await.unwrap();

    assert!(!scheduler.unschedule_monitor(99).await);
    assert_eq!(scheduler.task_count().await, 1);
    scheduler.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_unschedule_stops_future_firings() {
    let sink = Arc::new(RecordingSink::default());
    let scheduler = scheduler(sink.clone(), Arc::new(MemoryRepository::new()));
    let target = closed_port().await;

    scheduler.schedule_monitor(tcp_monitor(1, &target)).await.unwrap();
    tokio::time::sleep(Duration::from_secs(11)).await;
    assert!(sink.wait_for(1, 100).await >= 1);

    assert!(scheduler.unschedule_monitor(1).await);
    // let a probe that was already in flight finish
    tokio::time::sleep(Duration::from_secs(2)).await;
    let settled = sink.count().await;

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(sink.count().await, settled);
}

#[tokio::test]
async fn test_invalid_interval_is_rejected_synchronously() {
    let sink = Arc::new(RecordingSink::default());
    let scheduler = scheduler(sink, Arc::new(MemoryRepository::new()));

    let mut monitor = tcp_monitor(1, "db:5432");
    monitor.interval = 0;
    let err = scheduler.schedule_monitor(monitor).await.unwrap_err();
    assert_matches!(err, SchedulerError::InvalidSchedule(_));

    let mut monitor = tcp_monitor(1, "db:5432");
    monitor.interval = 5;
    let err = scheduler.schedule_monitor(monitor).await.unwrap_err();
    assert_matches!(err, SchedulerError::InvalidMonitor(_));

    assert_eq!(scheduler.task_count().await, 0);
}

#[tokio::test]
async fn test_concurrent_schedule_and_unschedule_never_leak() {
    let sink = Arc::new(RecordingSink::default());
    let scheduler = scheduler(sink, Arc::new(MemoryRepository::new()));

    let mut handles = Vec::new();
    for i in 0..50 {
        let scheduler = Arc::clone(&scheduler);
        handles.push(tokio::spawn(async move {
            if i % 2 == 0 {
                scheduler
                    .schedule_monitor(tcp_monitor(1, "db:5432"))
                    .await
                    .unwrap();
            } else {
                scheduler.unschedule_monitor(1).await;
            }
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert!(scheduler.task_count().await <= 1);
    scheduler.schedule_monitor(tcp_monitor(1, "db:5432")).await.unwrap();
    assert_eq!(scheduler.task_count().await, 1);
    scheduler.stop().await;
}

#[tokio::test]
async fn test_bootstrap_schedules_enabled_monitors() {
    let mut disabled = tcp_monitor(3, "db:5434");
    disabled.enabled = false;
    let mut broken = tcp_monitor(4, "no-port");
    broken.name = "broken".to_string();

    let repository = Arc::new(MemoryRepository::with_monitors([
        tcp_monitor(1, "db:5432"),
        tcp_monitor(2, "db:5433"),
        disabled,
        broken,
    ]));
    let scheduler = scheduler(Arc::new(RecordingSink::default()), repository);

    scheduler.start().await;
    scheduler.wait_for_bootstrap().await;

    let ids: Vec<_> = scheduler
        .list_tasks()
        .await
        .into_iter()
        .map(|t| t.monitor_id)
        .collect();
    assert_eq!(ids, vec![1, 2]);
    scheduler.stop().await;
}

#[tokio::test]
async fn test_admin_delete_during_bootstrap_wins() {
    let repository = Arc::new(MemoryRepository::with_monitors([
        tcp_monitor(1, "db:5432"),
        tcp_monitor(2, "db:5433"),
    ]));
    let scheduler = scheduler(Arc::new(RecordingSink::default()), repository);

    // start() only spawns bootstrap, so this call lands before it runs
    scheduler.start().await;
    scheduler.unschedule_monitor(2).await;
    scheduler.wait_for_bootstrap().await;

    let ids: Vec<_> = scheduler
        .list_tasks()
        .await
        .into_iter()
        .map(|t| t.monitor_id)
        .collect();
    assert_eq!(ids, vec![1]);
    scheduler.stop().await;
}
