use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use fleet_collector::health::HealthTracker;
use fleet_collector::http::{build_router, AppState};
use fleet_collector::{Broadcaster, IngestionService, Registry, SharedIngestion};
use fleet_devkit::{init_test_logging, MetricsPayloadBuilder};
use futures::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration as StdDuration;
use time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tower::ServiceExt;

struct TestApp {
    router: Router,
    ingestion: SharedIngestion,
    stop: watch::Sender<bool>,
}

fn test_app() -> TestApp {
    init_test_logging();
    let ingestion = Arc::new(IngestionService::new(Arc::new(Registry::default()), Broadcaster::default()));
    let (stop, shutdown) = watch::channel(false);
    let router = build_router(AppState {
        ingestion: Arc::clone(&ingestion),
        health: HealthTracker::new(false),
        soft_threshold: Duration::seconds(30),
        shutdown,
    });
    TestApp { router, ingestion, stop }
}

/// Router for request/response tests; no stream is held open, so the
/// shutdown sender is not kept.
fn app() -> (Router, SharedIngestion) {
    let TestApp { router, ingestion, .. } = test_app();
    (router, ingestion)
}

async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

fn post_metrics(body: Vec<u8>) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/api/metrics")
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

#[tokio::test]
async fn health_probe() {
    let (router, _) = app();
    let response = router.oneshot(get("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    assert_eq!(&bytes[..], b"ok");
}

#[tokio::test]
async fn test_route_reports_working() {
    let (router, _) = app();
    let (status, body) = send(&router, get("/test")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "Server is working!");
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn pushed_sample_is_queryable() {
    let (router, _) = app();
    let payload = MetricsPayloadBuilder::new("web-01").cpu(42.0).to_bytes();

    let (status, body) = send(&router, post_metrics(payload)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "success");

    let (status, body) = send(&router, get("/api/metrics/web-01")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["host_id"], "web-01");
    let metrics = body["metrics"].as_array().unwrap();
    assert_eq!(metrics.len(), 1);
    assert_eq!(metrics[0]["cpu_percent"], 42.0);

    let (_, body) = send(&router, get("/api/clients")).await;
    assert_eq!(body["active_clients"], serde_json::json!(["web-01"]));
    assert!(body["last_seen"]["web-01"].is_string());

    let (_, body) = send(&router, get("/api/metrics")).await;
    assert_eq!(body["web-01"].as_array().unwrap().len(), 1);
}

#[tokio::test]
async fn invalid_payload_is_rejected_without_side_effects() {
    let (router, ingestion) = app();
    let mut subscription = ingestion.broadcaster().subscribe();

    let missing_host = MetricsPayloadBuilder::new("web-01").without("host_id").to_bytes();
    let bad_cpu = MetricsPayloadBuilder::new("web-01").field("cpu_percent", "high").to_bytes();

    for body in [missing_host, bad_cpu, b"not json".to_vec()] {
        let (status, response) = send(&router, post_metrics(body)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(response["error"].is_string());
    }

    assert!(ingestion.registry().is_empty());
    assert!(subscription.try_recv().is_none());
    assert_eq!(ingestion.rejected(), 3);
}

#[tokio::test]
async fn unknown_host_is_not_found() {
    let (router, _) = app();
    let (status, body) = send(&router, get("/api/metrics/ghost")).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["host_id"], "ghost");
    assert_eq!(body["metrics"], serde_json::json!([]));
}

#[tokio::test]
async fn history_is_bounded_and_ordered() {
    let (router, _) = app();
    for uptime in 0..1005u64 {
        let payload = MetricsPayloadBuilder::new("db-01").uptime(uptime).to_bytes();
        let (status, _) = send(&router, post_metrics(payload)).await;
        assert_eq!(status, StatusCode::OK);
    }

    let (_, body) = send(&router, get("/api/metrics/db-01")).await;
    let uptimes: Vec<u64> = body["metrics"]
        .as_array()
        .unwrap()
        .iter()
        .map(|m| m["uptime_seconds"].as_u64().unwrap())
        .collect();
    assert_eq!(uptimes.len(), 1000);
    assert_eq!(uptimes.first(), Some(&5));
    assert_eq!(uptimes.last(), Some(&1004));
}

#[tokio::test]
async fn pushed_sample_reaches_subscribers() {
    let (router, ingestion) = app();
    let mut subscription = ingestion.broadcaster().subscribe();

    let payload = MetricsPayloadBuilder::new("edge-7").uptime(99).to_bytes();
    let (status, _) = send(&router, post_metrics(payload)).await;
    assert_eq!(status, StatusCode::OK);

    let event = subscription.recv().await.unwrap();
    assert_eq!(event.host_id, "edge-7");
    assert_eq!(event.sample.uptime_seconds, 99);
}

#[tokio::test]
async fn system_health_counts_samples() {
    let (router, _) = app();
    send(&router, post_metrics(MetricsPayloadBuilder::new("a").to_bytes())).await;
    send(&router, post_metrics(b"{}".to_vec())).await;

    let (status, body) = send(&router, get("/system/health")).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["hosts_tracked"], 1);
    assert_eq!(body["active_hosts"], 1);
    assert_eq!(body["samples_accepted"], 1);
    assert_eq!(body["samples_rejected"], 1);
    assert_eq!(body["mqtt_status"], "disabled");
}

#[tokio::test]
async fn stream_emits_new_metrics_events() {
    let TestApp { router, stop: _stop, .. } = test_app();

    let response = router.clone().oneshot(get("/api/stream")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.headers()["content-type"], "text/event-stream");
    let mut body = response.into_body().into_data_stream();

    let payload = MetricsPayloadBuilder::new("web-01").cpu(7.5).uptime(300).to_bytes();
    let (status, _) = send(&router, post_metrics(payload)).await;
    assert_eq!(status, StatusCode::OK);

    let chunk = tokio::time::timeout(StdDuration::from_secs(5), body.next())
        .await
        .expect("no event within 5s")
        .unwrap()
        .unwrap();
    let frame = String::from_utf8(chunk.to_vec()).unwrap();
    assert!(frame.starts_with("event: new_metrics\n"), "unexpected frame: {frame}");

    let data = frame.lines().find_map(|line| line.strip_prefix("data: ")).unwrap();
    let event: Value = serde_json::from_str(data).unwrap();
    assert_eq!(event["host_id"], "web-01");
    assert_eq!(event["metrics"]["host_id"], "web-01");
    assert_eq!(event["metrics"]["cpu_percent"], 7.5);
    assert_eq!(event["metrics"]["uptime_seconds"], 300);
}

#[tokio::test]
async fn stream_ends_when_shutdown_is_flagged() {
    let TestApp { router, stop, .. } = test_app();

    let response = router.oneshot(get("/api/stream")).await.unwrap();
    let mut body = response.into_body().into_data_stream();

    stop.send(true).unwrap();
    let end = tokio::time::timeout(StdDuration::from_secs(5), body.next()).await;
    assert!(matches!(end, Ok(None)));
}

#[tokio::test]
async fn graceful_shutdown_is_not_held_open_by_stream_clients() {
    let TestApp { router, stop, .. } = test_app();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    let mut shutdown = stop.subscribe();
    let server = tokio::spawn(async move {
        axum::serve(listener, router)
            .with_graceful_shutdown(async move {
                let _ = shutdown.wait_for(|stopping| *stopping).await;
            })
            .await
    });

    let mut client = TcpStream::connect(addr).await.unwrap();
    client
        .write_all(b"GET /api/stream HTTP/1.1\r\nHost: localhost\r\n\r\n")
        .await
        .unwrap();
    let mut head = [0u8; 256];
    let read = client.read(&mut head).await.unwrap();
    assert!(String::from_utf8_lossy(&head[..read]).starts_with("HTTP/1.1 200"));

    stop.send(true).unwrap();
    let stopped = tokio::time::timeout(StdDuration::from_secs(5), server).await;
    assert!(matches!(stopped, Ok(Ok(Ok(())))), "server still running after shutdown");
}
