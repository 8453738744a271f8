//! Fleet Agent - per-host metrics reporter
//!
//! Samples local system metrics every `interval_secs` and pushes them to
//! the fleet collector over HTTP (or MQTT). A failed sample or send is
//! logged and skipped; the loop never stops on its own.

mod config;
mod metrics;
mod transport;

use anyhow::{Context, Result};
use config::AgentConfig;
use std::time::Duration;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;
use transport::Transport;

/// Sample, then send. Every failure is logged here.
async fn tick(transport: &Transport, host_id: &str) {
    let report = match metrics::collect(host_id).await {
        Ok(report) => report,
        Err(e) => {
            warn!("Skipping tick: {}", e);
            return;
        }
    };

    match transport.send(&report).await {
        Ok(()) => debug!(
            cpu = report.cpu_percent,
            memory = report.memory_percent,
            "Metrics sent"
        ),
        Err(e) => error!("Failed to send metrics: {:#}", e),
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = AgentConfig::load().await.context("Failed to load agent config")?;
    let host_id = config.resolve_host_id()?;
    info!(
        host_id = %host_id,
        collector = %config.collector_url,
        transport = ?config.transport,
        interval_secs = config.interval_secs,
        "Fleet agent starting"
    );

    let transport = Transport::from_config(&config, &host_id)?;
    if let Err(e) = transport.probe(&config.probe_url()).await {
        warn!("Collector probe failed, will keep trying: {:#}", e);
    }

    let mut timer = interval(Duration::from_secs(config.interval_secs));
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // ctrl-c is honoured mid-cycle too
    let run = async {
        loop {
            timer.tick().await;
            tick(&transport, &host_id).await;
        }
    };
    tokio::select! {
        _ = run => {}
        _ = tokio::signal::ctrl_c() => info!("Fleet agent stopping"),
    }

    transport.shutdown();
    Ok(())
}
