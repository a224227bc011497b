//! Integration tests for concurrent report ingestion into the sentinel

use std::sync::Arc;

use chrono::{Duration, Utc};
use service_sentinel::{
    config::SentinelConfig,
    ingest::{AgentProbeItem, IngestionPoint},
    sentinel::{ServiceSentinel, ServiceStatus},
};

use crate::helpers::report;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_two_reporters_lose_no_report() {
    let sentinel = Arc::new(ServiceSentinel::new(SentinelConfig::default()));
    let base = Utc::now() - Duration::hours(1);

    let local = {
        let sentinel = Arc::clone(&sentinel);
        tokio::spawn(async move {
            for i in 0..500 {
                let ts = base + Duration::seconds(i * 2);
                sentinel.ingest(report(1, true, ts)).await.unwrap();
            }
        })
    };

    let ingestion = IngestionPoint::new(Arc::clone(&sentinel));
    let remote = tokio::spawn(async move {
        for chunk in 0..10 {
            let items = (0..30)
                .map(|i| AgentProbeItem {
                    monitor_id: 1,
                    success: i % 3 != 0,
                    latency_ms: 20,
                    timestamp: base + Duration::seconds(chunk * 60 + i * 2 + 1),
                    error_message: None,
                    status_code: None,
                    payload: None,
                })
                .collect();
            ingestion.accept_batch("edge-1", items).await.unwrap();
        }
    });

    // readers run alongside the writers
    let reader = {
        let sentinel = Arc::clone(&sentinel);
        tokio::spawn(async move {
            for _ in 0..100 {
                let _ = sentinel.snapshot().await;
                tokio::task::yield_now().await;
            }
        })
    };

    local.await.unwrap();
    remote.await.unwrap();
    reader.await.unwrap();

    let summary = sentinel.summary(1).await.unwrap();
    assert_eq!(summary.total_reports, 800);
    assert_eq!(summary.origins, vec!["edge-1".to_string()]);

    let day = sentinel
        .availability_since(1, Utc::now() - Duration::hours(24))
        .await
        .unwrap();
    assert_eq!(day.total_checks, 800);
    assert_eq!(day.failed_checks, 100);
}

#[tokio::test]
async fn test_out_of_order_reports_keep_latest_status() {
    let sentinel = ServiceSentinel::new(SentinelConfig::default());
    let now = Utc::now();

    sentinel
        .ingest(report(1, true, now - Duration::seconds(10)))
        .await
        .unwrap();
    // a late report from an agent arrives after a newer local one
    sentinel
        .ingest(report(1, false, now - Duration::minutes(5)))
        .await
        .unwrap();

    let summary = sentinel.summary(1).await.unwrap();
    assert_eq!(summary.status, ServiceStatus::Up);
    assert_eq!(summary.last_checked, Some(now - Duration::seconds(10)));
    assert_eq!(summary.total_reports, 2);
}

#[tokio::test]
async fn test_reports_beyond_horizon_are_dropped() {
    let sentinel = ServiceSentinel::new(SentinelConfig {
        retention_days: 1,
        ..SentinelConfig::default()
    });
    let now = Utc::now();

    sentinel
        .ingest(report(1, true, now - Duration::days(3)))
        .await
        .unwrap();
    sentinel.ingest(report(1, true, now)).await.unwrap();

    assert_eq!(sentinel.summary(1).await.unwrap().total_reports, 1);
}

#[tokio::test]
async fn test_snapshot_covers_every_monitor() {
    let sentinel = ServiceSentinel::new(SentinelConfig::default());
    let now = Utc::now();
    for id in [3, 1, 2] {
        sentinel.ingest(report(id, id != 2, now)).await.unwrap();
    }

    let snapshot = sentinel.snapshot().await;
    let statuses: Vec<_> = snapshot.iter().map(|s| (s.monitor_id, s.status)).collect();
    assert_eq!(
        statuses,
        vec![
            (1, ServiceStatus::Up),
            (2, ServiceStatus::Down),
            (3, ServiceStatus::Up)
        ]
    );
}
