//! Integration tests for the protocol probes against real local endpoints

use std::collections::BTreeMap;
use std::time::{Duration, Instant};

use assert_matches::assert_matches;
use service_sentinel::{
    model::{HttpProbeConfig, MAX_BODY_BYTES, ProbeSpec, TcpProbeConfig},
    probes::{ProbeError, ProbeExecutor},
};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use crate::helpers::{closed_port, http_monitor, icmp_monitor, tcp_monitor};

#[tokio::test]
async fn test_http_status_and_substring_match() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/health"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK ready"))
        .mount(&server)
        .await;

    let executor = ProbeExecutor::new().unwrap();
    let monitor = http_monitor(
        1,
        &format!("{}/health", server.uri()),
        HttpProbeConfig {
            expected_body: Some("ready".to_string()),
            ..Default::default()
        },
    );

    let result = executor.execute(&monitor).await.unwrap();
    assert!(result.success, "{:?}", result.error_message);
    assert_eq!(result.status_code, Some(200));
    assert_eq!(result.response_body.as_deref(), Some("OK ready"));
}

#[tokio::test]
async fn test_http_unexpected_status_names_both_codes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("OK ready"))
        .mount(&server)
        .await;

    let executor = ProbeExecutor::new().unwrap();
    let monitor = http_monitor(
        1,
        &server.uri(),
        HttpProbeConfig {
            expected_status: Some(201),
            ..Default::default()
        },
    );

    let result = executor.execute(&monitor).await.unwrap();
    assert!(!result.success);
    let message = result.error_message.unwrap();
    assert!(message.contains("200"), "{message}");
    assert!(message.contains("201"), "{message}");
}

#[tokio::test]
async fn test_http_missing_substring_fails() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("starting up"))
        .mount(&server)
        .await;

    let executor = ProbeExecutor::new().unwrap();
    let monitor = http_monitor(
        1,
        &server.uri(),
        HttpProbeConfig {
            expected_body: Some("ready".to_string()),
            ..Default::default()
        },
    );

    let result = executor.execute(&monitor).await.unwrap();
    assert!(!result.success);
    assert!(result.error_message.unwrap().contains("ready"));
}

#[tokio::test]
async fn test_http_method_and_headers_are_applied() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(header("x-probe", "sentinel"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let executor = ProbeExecutor::new().unwrap();
    let mut headers = BTreeMap::new();
    headers.insert("x-probe".to_string(), "sentinel".to_string());
    let monitor = http_monitor(
        1,
        &server.uri(),
        HttpProbeConfig {
            method: Some("post".to_string()),
            headers,
            expected_status: Some(204),
            ..Default::default()
        },
    );

    let result = executor.execute(&monitor).await.unwrap();
    assert!(result.success, "{:?}", result.error_message);
}

#[tokio::test]
async fn test_http_body_is_truncated() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200).set_body_string("x".repeat(10 * 1024)))
        .mount(&server)
        .await;

    let executor = ProbeExecutor::new().unwrap();
    let monitor = http_monitor(1, &server.uri(), HttpProbeConfig::default());

    let result = executor.execute(&monitor).await.unwrap();
    assert!(result.success);
    assert_eq!(result.response_body.unwrap().len(), MAX_BODY_BYTES);
}

#[tokio::test]
async fn test_http_target_without_scheme_defaults_to_http() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;

    let mock_url = url::Url::parse(&server.uri()).unwrap();
    let address = format!(
        "{}:{}",
        mock_url.host_str().unwrap(),
        mock_url.port().unwrap()
    );
    let executor = ProbeExecutor::new().unwrap();
    let result = executor
        .execute(&http_monitor(1, &address, HttpProbeConfig::default()))
        .await
        .unwrap();
    assert!(result.success);
}

#[tokio::test]
async fn test_http_connection_refused_is_data() {
    let target = format!("http://{}", closed_port().await);
    let executor = ProbeExecutor::new().unwrap();

    let result = executor
        .execute(&http_monitor(1, &target, HttpProbeConfig::default()))
        .await
        .unwrap();
    assert!(!result.success);
    assert!(result.error_message.is_some());
}

#[tokio::test]
async fn test_http_bad_header_is_config_error() {
    let executor = ProbeExecutor::new().unwrap();
    let mut headers = BTreeMap::new();
    headers.insert("bad header".to_string(), "x".to_string());

    let err = executor
        .execute(&http_monitor(
            1,
            "http://localhost",
            HttpProbeConfig {
                headers,
                ..Default::default()
            },
        ))
        .await
        .unwrap_err();
    assert_matches!(err, ProbeError::Config(_));
}

#[tokio::test]
async fn test_tcp_closed_port_fails_within_timeout() {
    let target = closed_port().await;
    let executor = ProbeExecutor::new().unwrap();
    let monitor = tcp_monitor(1, &target);

    let start = Instant::now();
    let result = executor.execute(&monitor).await.unwrap();

    assert!(!result.success);
    assert!(result.error_message.is_some());
    assert!(start.elapsed() < monitor.timeout() + Duration::from_millis(500));
}

#[tokio::test]
async fn test_tcp_send_and_expect() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let mut buf = [0u8; 64];
        let n = socket.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"PING\r\n");
        socket.write_all(b"+PONG\r\n").await.unwrap();
    });

    let mut monitor = tcp_monitor(1, &addr.to_string());
    monitor.probe = ProbeSpec::Tcp(TcpProbeConfig {
        send: Some("PING\r\n".to_string()),
        expect: Some("PONG".to_string()),
    });

    let executor = ProbeExecutor::new().unwrap();
    let result = executor.execute(&monitor).await.unwrap();
    assert!(result.success, "{:?}", result.error_message);
}

#[tokio::test]
async fn test_tcp_silent_server_times_out() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let (_socket, _) = listener.accept().await.unwrap();
        tokio::time::sleep(Duration::from_secs(5)).await;
    });

    let mut monitor = tcp_monitor(1, &addr.to_string());
    monitor.probe = ProbeSpec::Tcp(TcpProbeConfig {
        send: None,
        expect: Some("220".to_string()),
    });

    let executor = ProbeExecutor::new().unwrap();
    let start = Instant::now();
    let result = executor.execute(&monitor).await.unwrap();

    assert!(!result.success);
    assert!(result.error_message.unwrap().contains("timed out"));
    assert!(start.elapsed() < Duration::from_millis(1500));
}

// needs ICMP permissions or a working `ping` binary
#[tokio::test]
#[ignore]
async fn test_icmp_loopback_answers() {
    let executor = ProbeExecutor::new().unwrap();
    let result = executor.execute(&icmp_monitor(1, "127.0.0.1")).await.unwrap();
    assert!(result.success, "{:?}", result.error_message);
}

#[tokio::test]
#[ignore]
async fn test_icmp_unroutable_reports_full_loss() {
    let executor = ProbeExecutor::new().unwrap();
    let mut monitor = icmp_monitor(1, "10.255.255.1");
    monitor.timeout = Some(3);

    let result = executor.execute(&monitor).await.unwrap();
    assert!(!result.success);
    assert!(result.error_message.unwrap().contains("100% packet loss"));
}
