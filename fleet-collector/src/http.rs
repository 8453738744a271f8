/**
 * COLLECTOR HTTP API - axum router over the ingestion engine
 *
 * ROUTES:
 * - POST /api/metrics            agent push, 200 or 400
 * - GET  /api/metrics            every host's history
 * - GET  /api/metrics/{host_id}  one host's history, 404 if unknown
 * - GET  /api/clients            active hosts + last seen times
 * - GET  /api/stream             SSE, one `new_metrics` event per sample
 * - GET  /health, /test          probes
 * - GET  /system/health          collector health report
 *
 * Handlers hold no state of their own; everything goes through
 * `IngestionService` and its registry. Live streams end once the
 * shutdown flag flips, so a graceful shutdown is not held open by
 * connected SSE clients.
 */

use crate::health::{CollectorHealth, HealthTracker};
use crate::ingest::SharedIngestion;
use crate::sample::{format_rfc3339, Sample};
use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::{routing::get, Json, Router};
use futures::{Stream, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::convert::Infallible;
use time::{Duration, OffsetDateTime};
use tokio::sync::watch;
use tracing::debug;

#[derive(Clone)]
pub struct AppState {
    pub ingestion: SharedIngestion,
    pub health: HealthTracker,
    pub soft_threshold: Duration,
    /// Flips to `true` when the collector is stopping.
    pub shutdown: watch::Receiver<bool>,
}

/// Resolves once `true` is published or the sender is gone.
pub async fn shutdown_requested(mut shutdown: watch::Receiver<bool>) {
    let _ = shutdown.wait_for(|stopping| *stopping).await;
}

#[derive(Serialize)]
struct HostMetrics {
    host_id: String,
    metrics: Vec<Sample>,
}

#[derive(Serialize)]
struct ClientsView {
    active_clients: Vec<String>,
    last_seen: BTreeMap<String, String>,
}

#[derive(Serialize)]
struct LiveView<'a> {
    host_id: &'a str,
    metrics: &'a Sample,
}

pub fn build_router(app_state: AppState) -> Router {
    Router::new()
        .route("/health", get(|| async { "ok" }))
        .route("/test", get(test_probe))
        .route("/system/health", get(get_system_health))
        .route("/api/metrics", get(get_all_metrics).post(post_metrics))
        .route("/api/metrics/{host_id}", get(get_host_metrics))
        .route("/api/clients", get(get_clients))
        .route("/api/stream", get(stream_metrics))
        .with_state(app_state)
}

// GET /test
async fn test_probe() -> Json<Value> {
    Json(json!({
        "status": "Server is working!",
        "timestamp": format_rfc3339(OffsetDateTime::now_utc()),
    }))
}

// POST /api/metrics
async fn post_metrics(State(app): State<AppState>, body: Bytes) -> (StatusCode, Json<Value>) {
    match app.ingestion.ingest(&body) {
        Ok(_) => (StatusCode::OK, Json(json!({ "status": "success" }))),
        Err(e) => (StatusCode::BAD_REQUEST, Json(json!({ "error": e.to_string() }))),
    }
}

// GET /api/metrics
async fn get_all_metrics(State(app): State<AppState>) -> Json<BTreeMap<String, Vec<Sample>>> {
    Json(app.ingestion.registry().histories().into_iter().collect())
}

// GET /api/metrics/{host_id}
async fn get_host_metrics(
    State(app): State<AppState>,
    Path(host_id): Path<String>,
) -> Result<Json<HostMetrics>, (StatusCode, Json<Value>)> {
    match app.ingestion.registry().history(&host_id) {
        Some(metrics) => Ok(Json(HostMetrics { host_id, metrics })),
        None => Err((
            StatusCode::NOT_FOUND,
            Json(json!({ "error": "host not found", "host_id": host_id, "metrics": [] })),
        )),
    }
}

// GET /api/clients
async fn get_clients(State(app): State<AppState>) -> Json<ClientsView> {
    let registry = app.ingestion.registry();
    let active = registry.active_hosts(OffsetDateTime::now_utc(), app.soft_threshold);
    let last_seen = registry
        .last_seen()
        .into_iter()
        .map(|(host, at)| (host, format_rfc3339(at)))
        .collect();

    Json(ClientsView {
        active_clients: active.into_iter().collect(),
        last_seen,
    })
}

// GET /api/stream
async fn stream_metrics(State(app): State<AppState>) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let subscription = app.ingestion.broadcaster().subscribe();
    debug!(subscription = %subscription.id(), "SSE client connected");

    let events = subscription
        .into_stream()
        .take_until(shutdown_requested(app.shutdown.clone()))
        .filter_map(|event| async move {
            let view = LiveView {
                host_id: &event.host_id,
                metrics: &event.sample,
            };
            // a sample that cannot be encoded is skipped for this client
            Event::default()
                .event("new_metrics")
                .json_data(view)
                .ok()
                .map(Ok::<Event, Infallible>)
        });

    Sse::new(events).keep_alive(KeepAlive::default())
}

// GET /system/health
async fn get_system_health(State(app): State<AppState>) -> Json<CollectorHealth> {
    Json(app.health.report(&app.ingestion, app.soft_threshold))
}
