/**
 * INGESTION SERVICE - Single entry point for agent payloads
 *
 * FLOW: parse/validate -> stamp wall-clock time -> registry append + touch
 * (atomic) -> broadcast. Validation is the only failure point; a rejected
 * payload never reaches the registry or the broadcaster.
 *
 * Both transports (HTTP `POST /api/metrics` and the optional MQTT topic)
 * call into this service.
 */

use crate::broadcast::Broadcaster;
use crate::error::IngestError;
use crate::registry::Registry;
use crate::sample::Sample;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use time::OffsetDateTime;
use tracing::{debug, warn};

pub struct IngestionService {
    registry: Arc<Registry>,
    broadcaster: Broadcaster,
    accepted: AtomicU64,
    rejected: AtomicU64,
}

pub type SharedIngestion = Arc<IngestionService>;

impl IngestionService {
    pub fn new(registry: Arc<Registry>, broadcaster: Broadcaster) -> Self {
        Self {
            registry,
            broadcaster,
            accepted: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    pub fn broadcaster(&self) -> &Broadcaster {
        &self.broadcaster
    }

    pub fn accepted(&self) -> u64 {
        self.accepted.load(Ordering::Relaxed)
    }

    pub fn rejected(&self) -> u64 {
        self.rejected.load(Ordering::Relaxed)
    }

    /// Ingests a raw request body.
    pub fn ingest(&self, raw: &[u8]) -> Result<Arc<Sample>, IngestError> {
        match serde_json::from_slice::<Value>(raw) {
            Ok(value) => self.ingest_value(value),
            Err(e) => Err(self.reject(e.into())),
        }
    }

    /// Ingests an already decoded body, stamped with the current time.
    pub fn ingest_value(&self, value: Value) -> Result<Arc<Sample>, IngestError> {
        self.ingest_value_at(value, OffsetDateTime::now_utc())
    }

    /// Same as `ingest_value` with an explicit ingestion time, which is what
    /// liveness is computed from.
    pub fn ingest_value_at(&self, value: Value, now: OffsetDateTime) -> Result<Arc<Sample>, IngestError> {
        let sample = match Sample::from_json(value) {
            Ok(sample) => Arc::new(sample),
            Err(e) => return Err(self.reject(e)),
        };

        let broadcaster = &self.broadcaster;
        self.registry.record(Arc::clone(&sample), now, |stored| {
            let reached = broadcaster.publish(&stored.host_id, Arc::clone(stored));
            debug!(host_id = %stored.host_id, observers = reached, "sample ingested");
        });
        self.accepted.fetch_add(1, Ordering::Relaxed);

        Ok(sample)
    }

    fn reject(&self, error: IngestError) -> IngestError {
        self.rejected.fetch_add(1, Ordering::Relaxed);
        warn!(%error, "payload rejected");
        error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use time::macros::datetime;
    use time::Duration;

    fn service() -> IngestionService {
        IngestionService::new(Arc::new(Registry::default()), Broadcaster::new(16))
    }

    fn payload(host: &str) -> Value {
        json!({
            "host_id": host,
            "captured_at": "2024-01-01T00:00:00",
            "cpu_percent": 25.5,
            "memory_percent": 60.2,
            "disk_percent": 40.0,
            "memory_used_bytes": 1024,
            "memory_total_bytes": 4096,
            "disk_used_bytes": 10,
            "disk_total_bytes": 20,
            "network_sent_bytes": 1,
            "network_recv_bytes": 2,
            "uptime_seconds": 60,
            "os_info": "Linux 6.1"
        })
    }

    #[tokio::test]
    async fn end_to_end_single_sample() {
        let service = service();
        let mut sub = service.broadcaster().subscribe();

        let stored = service.ingest(payload("H1").to_string().as_bytes()).unwrap();

        let history = service.registry().history("H1").unwrap();
        assert_eq!(history, vec![Sample::clone(&stored)]);
        assert_eq!(history[0].captured_at, datetime!(2024-01-01 00:00:00 UTC));
        assert_eq!(history[0].cpu_percent, 25.5);

        let active = service
            .registry()
            .active_hosts(OffsetDateTime::now_utc(), Duration::seconds(30));
        assert!(active.contains("H1"));

        let event = sub.recv().await.unwrap();
        assert_eq!(event.host_id, "H1");
        assert_eq!(*event.sample, *stored);
        assert!(sub.try_recv().is_none());
        assert_eq!(service.accepted(), 1);
    }

    #[test]
    fn rejection_leaves_state_untouched() {
        let service = service();
        service.ingest_value(payload("H1")).unwrap();
        let mut sub = service.broadcaster().subscribe();
        let before = service.registry().histories();
        let seen_before = service.registry().last_seen();

        let mut missing_host = payload("H1");
        missing_host.as_object_mut().unwrap().remove("host_id");
        let mut bad_time = payload("H1");
        bad_time["captured_at"] = json!("not-a-time");

        assert!(service.ingest_value(missing_host).is_err());
        assert!(service.ingest_value(bad_time).is_err());
        assert!(service.ingest(b"{not json").is_err());

        assert_eq!(service.registry().histories(), before);
        assert_eq!(service.registry().last_seen(), seen_before);
        assert!(sub.try_recv().is_none());
        assert_eq!(service.rejected(), 3);
        assert_eq!(service.accepted(), 1);
    }

    #[test]
    fn liveness_follows_ingest_time() {
        let service = service();
        let now = OffsetDateTime::now_utc();
        service
            .ingest_value_at(payload("old"), now - Duration::seconds(31))
            .unwrap();
        service
            .ingest_value_at(payload("new"), now - Duration::seconds(29))
            .unwrap();

        let active = service.registry().active_hosts(now, Duration::seconds(30));
        assert_eq!(active.into_iter().collect::<Vec<_>>(), vec!["new".to_string()]);
    }

    #[test]
    fn concurrent_ingest_across_hosts() {
        let service = service();
        std::thread::scope(|scope| {
            for host in ["a", "b", "c"] {
                let service = &service;
                scope.spawn(move || {
                    for _ in 0..200 {
                        service.ingest_value(payload(host)).unwrap();
                    }
                });
            }
        });
        assert_eq!(service.registry().len(), 3);
        assert_eq!(service.accepted(), 600);
        for host in ["a", "b", "c"] {
            assert_eq!(service.registry().history(host).unwrap().len(), 200);
        }
    }
}
