/**
 * FLEET COLLECTOR - Entry point
 *
 * Boot order: .env -> logging -> config -> registry/broadcaster/ingestion
 * -> liveness sweeper -> optional MQTT listener -> HTTP server.
 * Ctrl-C stops the HTTP server gracefully, then the background tasks.
 */

use anyhow::{Context, Result};
use fleet_collector::config::load_config;
use fleet_collector::health::HealthTracker;
use fleet_collector::http::{build_router, shutdown_requested, AppState};
use fleet_collector::{mqtt, spawn_liveness_sweeper, Broadcaster, IngestionService, Registry};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    // .env is optional
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = load_config().await;
    config.validate().context("invalid collector configuration")?;
    let addr = config.listen_addr()?;
    let policy = config.liveness_policy();
    info!(
        listen = %addr,
        history_capacity = config.retention.history_capacity,
        subscriber_buffer = config.broadcast.subscriber_buffer,
        mqtt = config.mqtt.is_some(),
        "collector configuration loaded"
    );

    let registry = Arc::new(Registry::new(config.retention.history_capacity));
    let broadcaster = Broadcaster::new(config.broadcast.subscriber_buffer);
    let ingestion = Arc::new(IngestionService::new(Arc::clone(&registry), broadcaster));
    let health = HealthTracker::new(config.mqtt.is_some());

    let mut tasks = vec![spawn_liveness_sweeper(Arc::clone(&registry), policy.clone())];
    if let Some(mqtt_conf) = config.mqtt.clone() {
        tasks.push(mqtt::spawn_mqtt_listener(mqtt_conf, Arc::clone(&ingestion), health.clone()));
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let app = build_router(AppState {
        ingestion,
        health,
        soft_threshold: policy.soft_threshold,
        shutdown: shutdown_rx.clone(),
    });

    // the flag also ends every open /api/stream response
    tasks.push(tokio::spawn(async move {
        shutdown_signal().await;
        let _ = shutdown_tx.send(true);
    }));

    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_requested(shutdown_rx))
        .await
        .context("HTTP server failed")?;

    for task in tasks {
        task.abort();
    }
    info!("collector stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutdown requested");
}
