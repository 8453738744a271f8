use crate::ingest::IngestionService;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Instant;
use time::{Duration, OffsetDateTime};

#[derive(Debug, Serialize, Deserialize)]
pub struct CollectorHealth {
    pub uptime_seconds: u64,
    pub hosts_tracked: usize,
    pub active_hosts: usize,
    pub subscribers: usize,
    pub samples_accepted: u64,
    pub samples_rejected: u64,
    pub memory_usage_mb: f32,
    pub mqtt_status: String,
    pub mqtt_reconnects: u32,
}

#[derive(Clone)]
pub struct HealthTracker {
    start_time: Instant,
    mqtt_reconnects: Arc<AtomicU32>,
    mqtt_status: Arc<Mutex<String>>,
}

impl HealthTracker {
    /// `mqtt_enabled` picks the initial MQTT status.
    pub fn new(mqtt_enabled: bool) -> Self {
        let status = if mqtt_enabled { "connecting" } else { "disabled" };
        Self {
            start_time: Instant::now(),
            mqtt_reconnects: Arc::new(AtomicU32::new(0)),
            mqtt_status: Arc::new(Mutex::new(status.to_string())),
        }
    }

    pub fn mark_mqtt_connected(&self) {
        *self.mqtt_status.lock() = "connected".to_string();
    }

    pub fn increment_reconnects(&self) {
        self.mqtt_reconnects.fetch_add(1, Ordering::Relaxed);
        *self.mqtt_status.lock() = "reconnecting".to_string();
    }

    pub fn mqtt_status(&self) -> String {
        self.mqtt_status.lock().clone()
    }

    pub fn report(&self, ingestion: &IngestionService, soft_threshold: Duration) -> CollectorHealth {
        let registry = ingestion.registry();
        let active = registry.active_hosts(OffsetDateTime::now_utc(), soft_threshold);

        CollectorHealth {
            uptime_seconds: self.start_time.elapsed().as_secs(),
            hosts_tracked: registry.len(),
            active_hosts: active.len(),
            subscribers: ingestion.broadcaster().subscriber_count(),
            samples_accepted: ingestion.accepted(),
            samples_rejected: ingestion.rejected(),
            memory_usage_mb: memory_usage_mb(),
            mqtt_status: self.mqtt_status(),
            mqtt_reconnects: self.mqtt_reconnects.load(Ordering::Relaxed),
        }
    }
}

/// Resident set size of this process; 0 where it cannot be read.
fn memory_usage_mb() -> f32 {
    #[cfg(target_os = "linux")]
    {
        if let Ok(status) = std::fs::read_to_string("/proc/self/status") {
            let rss_kb = status
                .lines()
                .find(|line| line.starts_with("VmRSS:"))
                .and_then(|line| line.split_whitespace().nth(1))
                .and_then(|kb| kb.parse::<u64>().ok());
            if let Some(kb) = rss_kb {
                return kb as f32 / 1024.0;
            }
        }
    }

    0.0
}
