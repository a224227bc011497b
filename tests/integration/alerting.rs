//! Integration tests for alert delivery over webhook and Discord

use std::sync::Arc;

use chrono::{Duration, Utc};
use serde_json::json;
use service_sentinel::{
    alerts::{AlertEngine, NotifyingAlertEngine},
    config::{Alert, AlertingConfig, Discord, Webhook},
    model::{AvailabilityPeriod, LatencyStats, ProbeResult, ServiceAvailability},
    storage::{MemoryRepository, MonitorRepository},
};
use wiremock::matchers::{body_partial_json, body_string_contains, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::tcp_monitor;

fn window(total: u64, successful: u64) -> ServiceAvailability {
    let now = Utc::now();
    ServiceAvailability::from_counts(
        1,
        AvailabilityPeriod::Window,
        now - Duration::hours(1),
        now + Duration::seconds(1),
        total,
        successful,
        LatencyStats::default(),
    )
}

async fn repository_with_failure() -> Arc<MemoryRepository> {
    let mut monitor = tcp_monitor(1, "db:5432");
    monitor.name = "orders-db".to_string();
    monitor.notify_on_failure = true;

    let repository = Arc::new(MemoryRepository::with_monitors([monitor]));
    repository
        .save_result(&ProbeResult::failed(
            1,
            Utc::now() - Duration::minutes(1),
            1000,
            "connection refused",
        ))
        .await
        .unwrap();
    repository
}

fn webhook_engine(repository: Arc<MemoryRepository>, server: &MockServer) -> NotifyingAlertEngine {
    NotifyingAlertEngine::new(
        repository,
        Some(AlertingConfig {
            alert: Alert::Webhook(Webhook {
                url: format!("{}/hooks/sentinel", server.uri()),
            }),
            min_availability: None,
            timeout_secs: 10,
        }),
    )
    .unwrap()
}

#[tokio::test]
async fn test_webhook_fires_once_then_resolves() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/hooks/sentinel"))
        .and(body_partial_json(json!({
            "status": "firing",
            "monitor": "orders-db",
            "failed_checks": 3,
            "error": "connection refused"
        })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/hooks/sentinel"))
        .and(body_partial_json(json!({ "status": "resolved" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let engine = webhook_engine(repository_with_failure().await, &server);

    engine.evaluate_service_rules(1, &window(10, 7)).await.unwrap();
    // still breached: no second notification
    engine.evaluate_service_rules(1, &window(10, 6)).await.unwrap();
    assert!(engine.alert_state(1).await.unwrap().firing);

    engine.evaluate_service_rules(1, &window(10, 10)).await.unwrap();
    assert!(!engine.alert_state(1).await.unwrap().firing);

    server.verify().await;
}

#[tokio::test]
async fn test_muted_engine_tracks_state_silently() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200))
        .expect(0)
        .mount(&server)
        .await;

    let engine = webhook_engine(repository_with_failure().await, &server);
    engine.mute_until(Utc::now() + Duration::minutes(10)).await;

    engine.evaluate_service_rules(1, &window(10, 5)).await.unwrap();
    assert!(engine.alert_state(1).await.unwrap().firing);

    server.verify().await;
}

#[tokio::test]
async fn test_failing_webhook_does_not_error() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(500))
        .expect(1)
        .mount(&server)
        .await;

    let engine = webhook_engine(repository_with_failure().await, &server);
    engine.evaluate_service_rules(1, &window(10, 0)).await.unwrap();
    assert!(engine.alert_state(1).await.unwrap().firing);
}

#[tokio::test]
async fn test_availability_floor_triggers_alert() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_partial_json(json!({ "status": "firing" })))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;

    let mut monitor = tcp_monitor(1, "db:5432");
    monitor.failure_threshold = 50;
    let repository = Arc::new(MemoryRepository::with_monitors([monitor]));
    let engine = NotifyingAlertEngine::new(
        repository,
        Some(AlertingConfig {
            alert: Alert::Webhook(Webhook { url: server.uri() }),
            min_availability: Some(95.0),
            timeout_secs: 10,
        }),
    )
    .unwrap();

    engine.evaluate_service_rules(1, &window(20, 18)).await.unwrap();
}

#[tokio::test]
async fn test_discord_message_mentions_user() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(body_string_contains("<@4242>"))
        .and(body_string_contains("Service Failing"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let engine = NotifyingAlertEngine::new(
        repository_with_failure().await,
        Some(AlertingConfig {
            alert: Alert::Discord(Discord {
                url: server.uri(),
                user_id: Some("4242".to_string()),
            }),
            min_availability: None,
            timeout_secs: 10,
        }),
    )
    .unwrap();

    engine.evaluate_service_rules(1, &window(10, 2)).await.unwrap();
}

#[tokio::test]
async fn test_stalled_webhook_does_not_block_evaluation() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(200).set_delay(std::time::Duration::from_secs(60)))
        .mount(&server)
        .await;

    let engine = NotifyingAlertEngine::new(
        repository_with_failure().await,
        Some(AlertingConfig {
            alert: Alert::Webhook(Webhook { url: server.uri() }),
            min_availability: None,
            timeout_secs: 1,
        }),
    )
    .unwrap();

    let evaluation = tokio::time::timeout(
        std::time::Duration::from_secs(10),
        engine.evaluate_service_rules(1, &window(10, 2)),
    )
    .await;

    assert!(evaluation.is_ok(), "evaluation waited on the webhook");
    evaluation.unwrap().unwrap();
    // the transition is recorded even though delivery timed out
    assert!(engine.alert_state(1).await.unwrap().firing);
}
