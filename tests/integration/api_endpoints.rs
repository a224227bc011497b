//! End-to-end tests of the hub API over a real socket

use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::{Value, json};
use service_sentinel::{
    actors::uploader::{UploaderHandle, UploaderSettings},
    api::{ApiState, spawn_api_server},
    config::{ApiConfig, SentinelConfig},
    ingest::AgentProbeItem,
    probes::ProbeExecutor,
    scheduler::{HubPipeline, Scheduler},
    sentinel::ServiceSentinel,
    storage::{MemoryRepository, MonitorRepository},
};

use crate::helpers::{closed_port, tcp_monitor};

const TOKEN: &str = "test-token";

struct Hub {
    base: String,
    client: reqwest::Client,
    repository: Arc<MemoryRepository>,
    scheduler: Arc<Scheduler>,
}

impl Hub {
    async fn start() -> Self {
        let repository = Arc::new(MemoryRepository::new());
        let sentinel = Arc::new(ServiceSentinel::new(SentinelConfig::default()));
        let pipeline = HubPipeline::new(repository.clone(), sentinel.clone());
        let scheduler = Arc::new(
            Scheduler::new(
                Arc::new(ProbeExecutor::new().unwrap()),
                Arc::new(pipeline),
                repository.clone(),
            )
            .with_sentinel(sentinel.clone()),
        );

        let config = ApiConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            auth_token: Some(TOKEN.to_string()),
            enable_cors: true,
        };
        let state = ApiState::new(scheduler.clone(), sentinel, repository.clone());
        let addr = spawn_api_server(config, state).await.unwrap();

        Self {
            base: format!("http://{addr}"),
            client: reqwest::Client::new(),
            repository,
            scheduler,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base, path)
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        self.client.get(self.url(path)).bearer_auth(TOKEN)
    }
}

#[tokio::test]
async fn test_health_is_public_and_the_rest_is_not() {
    let hub = Hub::start().await;

    let response = hub.client.get(hub.url("/api/v1/health")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["status"], "ok");
    assert_eq!(body["scheduled_tasks"], 0);

    let response = hub.client.get(hub.url("/api/v1/overview")).send().await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let response = hub
        .client
        .get(hub.url("/api/v1/overview"))
        .bearer_auth("wrong")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::FORBIDDEN);

    let response = hub.get("/api/v1/overview").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
}

#[tokio::test]
async fn test_task_lifecycle() {
    let hub = Hub::start().await;
    let monitor = tcp_monitor(5, &closed_port().await);

    let response = hub
        .client
        .put(hub.url("/api/v1/tasks"))
        .bearer_auth(TOKEN)
        .json(&monitor)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let task: Value = response.json().await.unwrap();
    assert_eq!(task["monitor_id"], 5);
    assert_eq!(task["period_secs"], 10);
    assert_eq!(task["probe_type"], "tcp");

    // persisted before it was scheduled
    assert_eq!(hub.repository.get_monitor(5).await.unwrap(), Some(monitor.clone()));

    let tasks: Value = hub.get("/api/v1/tasks").send().await.unwrap().json().await.unwrap();
    assert_eq!(tasks["tasks"].as_array().unwrap().len(), 1);

    let response = hub
        .client
        .post(hub.url("/api/v1/tasks/5/probe"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let result: Value = response.json().await.unwrap();
    assert_eq!(result["success"], false);
    assert!(result["error_message"].is_string());

    // the manual run went through the pipeline
    let detail: Value = hub.get("/api/v1/overview/5").send().await.unwrap().json().await.unwrap();
    assert_eq!(detail["summary"]["total_reports"], 1);
    assert_eq!(detail["summary"]["status"], "down");

    let response = hub
        .client
        .delete(hub.url("/api/v1/tasks/5"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(hub.scheduler.task_count().await, 0);

    let response = hub
        .client
        .delete(hub.url("/api/v1/tasks/5"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = hub.get("/api/v1/overview/5").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_invalid_monitor_is_rejected() {
    let hub = Hub::start().await;
    let mut monitor = tcp_monitor(6, "db:5432");
    monitor.interval = 0;

    let response = hub
        .client
        .put(hub.url("/api/v1/tasks"))
        .bearer_auth(TOKEN)
        .json(&monitor)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body: Value = response.json().await.unwrap();
    assert!(body["error"].is_string());

    // nothing was stored
    assert_eq!(hub.repository.get_monitor(6).await.unwrap(), None);
}

#[tokio::test]
async fn test_disabling_with_invalid_edit_unschedules() {
    let hub = Hub::start().await;
    let put = |monitor: service_sentinel::model::ServiceMonitor| {
        hub.client
            .put(hub.url("/api/v1/tasks"))
            .bearer_auth(TOKEN)
            .json(&monitor)
            .send()
    };

    let response = put(tcp_monitor(8, &closed_port().await)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(hub.scheduler.task_count().await, 1);

    let mut edited = tcp_monitor(8, "db:5432");
    edited.interval = 0;
    edited.enabled = false;
    let response = put(edited).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert!(body.is_null());

    assert_eq!(hub.scheduler.task_count().await, 0);
    let stored = hub.repository.get_monitor(8).await.unwrap().unwrap();
    assert!(!stored.enabled);
}

#[tokio::test]
async fn test_unknown_task_and_probe_are_not_found() {
    let hub = Hub::start().await;

    let response = hub.get("/api/v1/tasks/42").send().await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = hub
        .client
        .post(hub.url("/api/v1/tasks/42/probe"))
        .bearer_auth(TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_agent_reports_show_up_in_overview() {
    let hub = Hub::start().await;

    let mut settings = UploaderSettings::new(&hub.base, "edge-7");
    settings.token = Some(TOKEN.to_string());
    let uploader = UploaderHandle::spawn(settings).unwrap();

    for success in [true, true, false] {
        uploader
            .enqueue(AgentProbeItem {
                monitor_id: 9,
                success,
                latency_ms: 30,
                timestamp: chrono::Utc::now(),
                error_message: (!success).then(|| "timed out".to_string()),
                status_code: None,
                payload: None,
            })
            .await
            .unwrap();
    }
    assert_eq!(uploader.flush().await.unwrap(), 3);
    uploader.shutdown().await;

    let overview: Value = hub.get("/api/v1/overview").send().await.unwrap().json().await.unwrap();
    let monitors = overview["monitors"].as_array().unwrap();
    assert_eq!(monitors.len(), 1);
    assert_eq!(monitors[0]["monitor_id"], 9);
    assert_eq!(monitors[0]["total_reports"], 3);
    assert_eq!(monitors[0]["origins"], json!(["edge-7"]));
}

#[tokio::test]
async fn test_agent_reports_require_token() {
    let hub = Hub::start().await;

    let response = hub
        .client
        .post(hub.url("/api/v1/agents/edge-7/reports"))
        .json(&json!({ "items": [] }))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_availability_rejects_window_period() {
    let hub = Hub::start().await;

    let response = hub
        .get("/api/v1/monitors/1/availability?period=window")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);

    let response = hub
        .get("/api/v1/monitors/1/availability?period=day")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body: Value = response.json().await.unwrap();
    assert_eq!(body["rollups"], json!([]));
}
