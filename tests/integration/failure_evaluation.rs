//! Integration tests for the persist → sentinel → evaluator pipeline

use std::sync::Arc;

use chrono::{Duration, Utc};
use service_sentinel::{
    config::{EvaluatorConfig, SentinelConfig},
    evaluator::FailureEvaluator,
    model::{AvailabilityPeriod, ProbeResult},
    scheduler::{HubPipeline, ResultSink},
    sentinel::ServiceSentinel,
    storage::{MemoryRepository, MonitorRepository},
};

use crate::helpers::{RecordingEngine, tcp_monitor};

#[tokio::test]
async fn test_window_snapshot_reaches_engine() {
    let mut monitor = tcp_monitor(1, "db:5432");
    monitor.notify_on_failure = true;

    let repository = Arc::new(MemoryRepository::with_monitors([monitor.clone()]));
    let now = Utc::now();
    for i in 0..7u64 {
        let ts = now - Duration::minutes(30) + Duration::minutes(i as i64);
        repository
            .save_result(&ProbeResult::succeeded(1, ts, (i + 1) * 10))
            .await
            .unwrap();
    }
    for i in 0..3 {
        let ts = now - Duration::minutes(10) + Duration::minutes(i);
        repository
            .save_result(&ProbeResult::failed(1, ts, 900, "connection refused"))
            .await
            .unwrap();
    }

    let engine = Arc::new(RecordingEngine::default());
    let evaluator = FailureEvaluator::new(repository, engine.clone(), EvaluatorConfig::default());

    let snapshot = evaluator.evaluate(&monitor).await.unwrap();
    assert_eq!(snapshot.period, AvailabilityPeriod::Window);
    assert_eq!(snapshot.total_checks, 10);
    assert_eq!(snapshot.failed_checks, 3);
    assert_eq!(snapshot.availability, 70.0);
    assert_eq!(snapshot.min_latency_ms, Some(10));
    assert_eq!(snapshot.max_latency_ms, Some(70));
    assert_eq!(snapshot.avg_latency_ms, Some(40.0));

    let calls = engine.calls.lock().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].0, 1);
    assert_eq!(calls[0].1, snapshot);
}

#[tokio::test]
async fn test_results_outside_lookback_are_ignored() {
    let mut monitor = tcp_monitor(1, "db:5432");
    monitor.notify_on_failure = true;

    let repository = Arc::new(MemoryRepository::with_monitors([monitor.clone()]));
    let now = Utc::now();
    repository
        .save_result(&ProbeResult::failed(1, now - Duration::hours(3), 5, "old"))
        .await
        .unwrap();
    repository
        .save_result(&ProbeResult::succeeded(1, now - Duration::minutes(1), 5))
        .await
        .unwrap();

    let engine = Arc::new(RecordingEngine::default());
    let evaluator = FailureEvaluator::new(
        repository,
        engine,
        EvaluatorConfig {
            lookback_secs: 600,
            ..EvaluatorConfig::default()
        },
    );

    let snapshot = evaluator.evaluate(&monitor).await.unwrap();
    assert_eq!(snapshot.total_checks, 1);
    assert_eq!(snapshot.failed_checks, 0);
}

#[tokio::test]
async fn test_monitor_without_notify_is_not_evaluated() {
    let monitor = tcp_monitor(1, "db:5432");
    let repository = Arc::new(MemoryRepository::with_monitors([monitor.clone()]));
    let engine = Arc::new(RecordingEngine::default());
    let evaluator = FailureEvaluator::new(repository, engine.clone(), EvaluatorConfig::default());

    assert!(evaluator.evaluate(&monitor).await.is_none());
    assert!(engine.calls.lock().await.is_empty());
}

#[tokio::test]
async fn test_offline_repository_skips_evaluation() {
    let mut monitor = tcp_monitor(1, "db:5432");
    monitor.notify_on_failure = true;
    let repository = Arc::new(MemoryRepository::with_monitors([monitor.clone()]));
    repository.set_offline(true);

    let engine = Arc::new(RecordingEngine::default());
    let evaluator = FailureEvaluator::new(repository, engine.clone(), EvaluatorConfig::default());

    assert!(evaluator.evaluate(&monitor).await.is_none());
    assert!(engine.calls.lock().await.is_empty());
}

#[tokio::test]
async fn test_pipeline_persists_before_evaluating() {
    let mut monitor = tcp_monitor(1, "db:5432");
    monitor.notify_on_failure = true;

    let repository = Arc::new(MemoryRepository::with_monitors([monitor.clone()]));
    let sentinel = Arc::new(ServiceSentinel::new(SentinelConfig::default()));
    let engine = Arc::new(RecordingEngine::default());
    let evaluator = Arc::new(FailureEvaluator::new(
        repository.clone(),
        engine.clone(),
        EvaluatorConfig::default(),
    ));
    let pipeline =
        HubPipeline::new(repository.clone(), sentinel.clone()).with_evaluator(evaluator);

    let result = ProbeResult::failed(1, Utc::now() - Duration::seconds(1), 1000, "timed out");
    pipeline.handle(&monitor, &result).await;

    assert_eq!(repository.result_count().await, 1);
    assert_eq!(sentinel.summary(1).await.unwrap().total_reports, 1);

    // the snapshot already contains the result that triggered it
    let calls = engine.calls.lock().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0].1.failed_checks, 1);
}

#[tokio::test]
async fn test_pipeline_survives_storage_outage() {
    let monitor = tcp_monitor(1, "db:5432");
    let repository = Arc::new(MemoryRepository::with_monitors([monitor.clone()]));
    repository.set_offline(true);
    let sentinel = Arc::new(ServiceSentinel::new(SentinelConfig::default()));
    let pipeline = HubPipeline::new(repository.clone(), sentinel.clone());

    pipeline
        .handle(&monitor, &ProbeResult::succeeded(1, Utc::now(), 3))
        .await;

    // the sentinel still sees the run
    assert_eq!(sentinel.summary(1).await.unwrap().total_reports, 1);
}
