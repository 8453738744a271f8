//! Host metrics sampling
//!
//! One `MetricsReport` per tick: CPU, memory, root disk, network totals,
//! uptime and OS description, in the collector's wire format.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::Path;
use sysinfo::{Disks, Networks, System};
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error)]
pub enum SampleError {
    #[error("metrics unavailable: {0}")]
    Unavailable(&'static str),
}

/// Wire payload for `POST /api/metrics`
#[derive(Debug, Clone, Serialize)]
pub struct MetricsReport {
    pub host_id: String,
    pub captured_at: DateTime<Utc>,
    pub cpu_percent: f64,
    pub memory_percent: f64,
    pub disk_percent: f64,
    pub memory_used_bytes: u64,
    pub memory_total_bytes: u64,
    pub disk_used_bytes: u64,
    pub disk_total_bytes: u64,
    pub network_sent_bytes: u64,
    pub network_recv_bytes: u64,
    pub uptime_seconds: u64,
    pub os_info: String,
}

/// Space of one mounted filesystem
#[derive(Debug, Clone, PartialEq)]
pub struct DiskUsage {
    pub mount_point: String,
    pub total_bytes: u64,
    pub available_bytes: u64,
}

impl DiskUsage {
    pub fn used_bytes(&self) -> u64 {
        self.total_bytes.saturating_sub(self.available_bytes)
    }
}

/// Collect one report for `host_id`
pub async fn collect(host_id: &str) -> Result<MetricsReport, SampleError> {
    debug!("Collecting system metrics...");

    let mut sys = System::new_all();

    // Two CPU refreshes are needed for a usage figure
    tokio::time::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL).await;
    sys.refresh_cpu_usage();

    if sys.cpus().is_empty() {
        return Err(SampleError::Unavailable("cpu count"));
    }
    let memory_total_bytes = sys.total_memory();
    if memory_total_bytes == 0 {
        return Err(SampleError::Unavailable("memory totals"));
    }
    let memory_used_bytes = sys.used_memory();

    let disks = Disks::new_with_refreshed_list();
    let usages: Vec<DiskUsage> = disks
        .list()
        .iter()
        .map(|disk| DiskUsage {
            mount_point: disk.mount_point().to_string_lossy().into_owned(),
            total_bytes: disk.total_space(),
            available_bytes: disk.available_space(),
        })
        .collect();
    let (disk_used_bytes, disk_total_bytes) = select_disk(&usages)
        .map(|disk| (disk.used_bytes(), disk.total_bytes))
        .unwrap_or((0, 0));

    let networks = Networks::new_with_refreshed_list();
    let (network_sent_bytes, network_recv_bytes) = networks
        .iter()
        .fold((0u64, 0u64), |(sent, recv), (_, data)| {
            (
                sent.saturating_add(data.total_transmitted()),
                recv.saturating_add(data.total_received()),
            )
        });

    Ok(MetricsReport {
        host_id: host_id.to_string(),
        captured_at: Utc::now(),
        cpu_percent: round2(sys.global_cpu_info().cpu_usage() as f64),
        memory_percent: percent(memory_used_bytes, memory_total_bytes),
        disk_percent: percent(disk_used_bytes, disk_total_bytes),
        memory_used_bytes,
        memory_total_bytes,
        disk_used_bytes,
        disk_total_bytes,
        network_sent_bytes,
        network_recv_bytes,
        uptime_seconds: System::uptime(),
        os_info: os_info(System::name(), System::kernel_version()),
    })
}

/// The root filesystem, or the largest one when `/` is not mounted
pub fn select_disk(disks: &[DiskUsage]) -> Option<&DiskUsage> {
    disks
        .iter()
        .find(|disk| Path::new(&disk.mount_point) == Path::new("/"))
        .or_else(|| disks.iter().max_by_key(|disk| disk.total_bytes))
}

fn percent(used: u64, total: u64) -> f64 {
    if total == 0 {
        return 0.0;
    }
    round2(used as f64 * 100.0 / total as f64)
}

fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

fn os_info(name: Option<String>, kernel: Option<String>) -> String {
    match (name, kernel) {
        (Some(name), Some(kernel)) => format!("{name} {kernel}"),
        (Some(only), None) | (None, Some(only)) => only,
        (None, None) => std::env::consts::OS.to_string(),
    }
}
