use crate::registry::Registry;
use std::sync::Arc;
use time::{Duration, OffsetDateTime};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info};

/// Silence durations that drive host liveness.
#[derive(Debug, Clone, PartialEq)]
pub struct LivenessPolicy {
    /// Past this, a host is no longer reported as active.
    pub soft_threshold: Duration,
    /// Past this, a host and its history are dropped.
    pub hard_threshold: Duration,
    pub sweep_interval: std::time::Duration,
}

impl Default for LivenessPolicy {
    fn default() -> Self {
        Self {
            soft_threshold: Duration::seconds(30),
            hard_threshold: Duration::minutes(5),
            sweep_interval: std::time::Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SweepSummary {
    pub evicted: Vec<String>,
    pub tracked: usize,
    pub inactive: usize,
}

/// One sweeper tick at `now`.
pub fn sweep_once(registry: &Registry, policy: &LivenessPolicy, now: OffsetDateTime) -> SweepSummary {
    let report = registry.sweep(now, policy.hard_threshold);
    let active = registry.active_hosts(now, policy.soft_threshold).len();
    SweepSummary {
        evicted: report.evicted,
        tracked: report.remaining,
        inactive: report.remaining.saturating_sub(active),
    }
}

/// Starts the periodic liveness sweep. The task runs until aborted.
///
/// Each tick runs on the blocking pool; a tick that panics is logged and
/// the next one is scheduled as usual.
pub fn spawn_liveness_sweeper(registry: Arc<Registry>, policy: LivenessPolicy) -> JoinHandle<()> {
    info!(
        interval_secs = policy.sweep_interval.as_secs(),
        soft_secs = policy.soft_threshold.whole_seconds(),
        hard_secs = policy.hard_threshold.whole_seconds(),
        "starting liveness sweeper"
    );

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(policy.sweep_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            interval.tick().await;

            let registry = Arc::clone(&registry);
            let tick_policy = policy.clone();
            let outcome = tokio::task::spawn_blocking(move || {
                sweep_once(&registry, &tick_policy, OffsetDateTime::now_utc())
            })
            .await;

            match outcome {
                Ok(summary) if !summary.evicted.is_empty() => {
                    info!(
                        evicted = ?summary.evicted,
                        tracked = summary.tracked,
                        inactive = summary.inactive,
                        "evicted silent hosts"
                    );
                }
                Ok(summary) => {
                    debug!(tracked = summary.tracked, inactive = summary.inactive, "sweep done");
                }
                Err(e) => error!(error = %e, "liveness sweep failed, continuing"),
            }
        }
    })
}
