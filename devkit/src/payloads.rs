/*!
Builders for agent metric payloads, as sent to `POST /api/metrics` or the
MQTT metrics topic.

```ignore
let body = MetricsPayloadBuilder::new("web-01").cpu(12.5).to_bytes();
let broken = MetricsPayloadBuilder::new("web-01").without("captured_at").build();
```
*/

use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone)]
pub struct MetricsPayloadBuilder {
    fields: Map<String, Value>,
}

impl MetricsPayloadBuilder {
    /// Complete, valid payload for `host_id` with plausible values,
    /// captured now.
    pub fn new<S: Into<String>>(host_id: S) -> Self {
        let base = json!({
            "host_id": host_id.into(),
            "captured_at": Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            "cpu_percent": 12.5,
            "memory_percent": 48.0,
            "disk_percent": 61.2,
            "memory_used_bytes": 4_123_000_000u64,
            "memory_total_bytes": 8_589_934_592u64,
            "disk_used_bytes": 150_000_000_000u64,
            "disk_total_bytes": 250_000_000_000u64,
            "network_sent_bytes": 1_048_576u64,
            "network_recv_bytes": 5_242_880u64,
            "uptime_seconds": 3600u64,
            "os_info": "Linux 6.1.0"
        });
        let fields = match base {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self { fields }
    }

    pub fn captured_at(self, at: DateTime<Utc>) -> Self {
        self.field("captured_at", at.to_rfc3339())
    }

    /// Timestamp in the offset-less ISO form older agents send.
    pub fn captured_naive(self, at: DateTime<Utc>) -> Self {
        self.field("captured_at", at.naive_utc().format("%Y-%m-%dT%H:%M:%S%.6f").to_string())
    }

    pub fn cpu(self, percent: f64) -> Self {
        self.field("cpu_percent", percent)
    }

    pub fn memory(self, used_bytes: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes == 0 { 0.0 } else { used_bytes as f64 * 100.0 / total_bytes as f64 };
        self.field("memory_used_bytes", used_bytes)
            .field("memory_total_bytes", total_bytes)
            .field("memory_percent", percent)
    }

    pub fn disk(self, used_bytes: u64, total_bytes: u64) -> Self {
        let percent = if total_bytes == 0 { 0.0 } else { used_bytes as f64 * 100.0 / total_bytes as f64 };
        self.field("disk_used_bytes", used_bytes)
            .field("disk_total_bytes", total_bytes)
            .field("disk_percent", percent)
    }

    pub fn uptime(self, seconds: u64) -> Self {
        self.field("uptime_seconds", seconds)
    }

    /// Overrides or adds any field, e.g. to send a wrongly typed value.
    pub fn field<V: Into<Value>>(mut self, key: &str, value: V) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    pub fn without(mut self, key: &str) -> Self {
        self.fields.remove(key);
        self
    }

    pub fn build(self) -> Value {
        Value::Object(self.fields)
    }

    pub fn to_bytes(self) -> Vec<u8> {
        self.build().to_string().into_bytes()
    }
}
