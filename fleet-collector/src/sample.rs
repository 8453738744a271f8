/**
 * SAMPLE - One host's metrics snapshot at a point in time
 *
 * ROLE: value object stored by the registry and fanned out to observers.
 * Built only through `Sample::from_json`, which is the single validation
 * point of the ingestion path.
 *
 * WIRE FORMAT: JSON object, snake_case fields. `host_id` and `captured_at`
 * are mandatory. Payloads from the legacy python agent (`pc_name`,
 * `timestamp`, `*_gb` / `*_mb` counters) are accepted as well.
 */

use crate::error::IngestError;
use serde::{Serialize, Serializer};
use serde_json::{Map, Value};
use time::format_description::well_known::{Iso8601, Rfc3339};
use time::{OffsetDateTime, PrimitiveDateTime};

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;
const MIB: f64 = 1024.0 * 1024.0;

const HOST_ID: &[&str] = &["host_id", "pc_name"];
const CAPTURED_AT: &[&str] = &["captured_at", "timestamp"];

/// Counter field, plus the legacy key and its unit in bytes.
struct CounterField {
    key: &'static str,
    legacy: Option<(&'static str, f64)>,
}

const MEMORY_USED: CounterField = CounterField { key: "memory_used_bytes", legacy: Some(("memory_used_gb", GIB)) };
const MEMORY_TOTAL: CounterField = CounterField { key: "memory_total_bytes", legacy: Some(("memory_total_gb", GIB)) };
const DISK_USED: CounterField = CounterField { key: "disk_used_bytes", legacy: Some(("disk_used_gb", GIB)) };
const DISK_TOTAL: CounterField = CounterField { key: "disk_total_bytes", legacy: Some(("disk_total_gb", GIB)) };
const NET_SENT: CounterField = CounterField { key: "network_sent_bytes", legacy: Some(("network_sent_mb", MIB)) };
const NET_RECV: CounterField = CounterField { key: "network_recv_bytes", legacy: Some(("network_recv_mb", MIB)) };

/// 2^64: the first float past the `u64` range.
const U64_LIMIT: f64 = u64::MAX as f64;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Sample {
    pub host_id: String,
    #[serde(serialize_with = "serialize_rfc3339")]
    pub captured_at: OffsetDateTime,
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

impl Sample {
    /// Validates a decoded payload and builds the sample.
    ///
    /// Percentages are stored as received, out-of-range values included.
    /// Optional numeric fields default to zero when absent or `null`.
    pub fn from_json(value: Value) -> Result<Self, IngestError> {
        let Value::Object(fields) = value else {
            return Err(IngestError::Malformed);
        };

        let host_id = match lookup(&fields, HOST_ID) {
            None => return Err(IngestError::MissingField("host_id")),
            Some(Value::String(s)) if !s.trim().is_empty() => s.clone(),
            Some(Value::String(_)) => return Err(IngestError::invalid("host_id", "must not be empty")),
            Some(_) => return Err(IngestError::invalid("host_id", "expected a string")),
        };

        let captured_at = match lookup(&fields, CAPTURED_AT) {
            None => return Err(IngestError::MissingField("captured_at")),
            Some(Value::String(s)) => parse_timestamp(s)
                .ok_or_else(|| IngestError::invalid("captured_at", format!("unparseable timestamp `{s}`")))?,
            Some(_) => return Err(IngestError::invalid("captured_at", "expected a timestamp string")),
        };

        let os_info = match fields.get("os_info") {
            None | Some(Value::Null) => String::new(),
            Some(Value::String(s)) => s.clone(),
            Some(_) => return Err(IngestError::invalid("os_info", "expected a string")),
        };

        Ok(Sample {
            host_id,
            captured_at,
            cpu_percent: percent(&fields, "cpu_percent")?,
            memory_percent: percent(&fields, "memory_percent")?,
            disk_percent: percent(&fields, "disk_percent")?,
            memory_used_bytes: counter(&fields, &MEMORY_USED)?,
            memory_total_bytes: counter(&fields, &MEMORY_TOTAL)?,
            disk_used_bytes: counter(&fields, &DISK_USED)?,
            disk_total_bytes: counter(&fields, &DISK_TOTAL)?,
            network_sent_bytes: counter(&fields, &NET_SENT)?,
            network_recv_bytes: counter(&fields, &NET_RECV)?,
            uptime_seconds: whole_number(&fields, "uptime_seconds")?,
            os_info,
        })
    }
}

/// First non-null value among `keys`.
fn lookup<'a>(fields: &'a Map<String, Value>, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| fields.get(*key))
        .find(|value| !value.is_null())
}

fn percent(fields: &Map<String, Value>, key: &'static str) -> Result<f64, IngestError> {
    match lookup(fields, &[key]) {
        None => Ok(0.0),
        Some(value) => value
            .as_f64()
            .ok_or_else(|| IngestError::invalid(key, "expected a number")),
    }
}

fn counter(fields: &Map<String, Value>, field: &CounterField) -> Result<u64, IngestError> {
    if let Some(value) = lookup(fields, &[field.key]) {
        return to_counter(field.key, value, 1.0);
    }
    match field.legacy.and_then(|(key, unit)| lookup(fields, &[key]).map(|v| (v, unit))) {
        Some((value, unit)) => to_counter(field.key, value, unit),
        None => Ok(0),
    }
}

fn to_counter(key: &'static str, value: &Value, unit: f64) -> Result<u64, IngestError> {
    if unit == 1.0 {
        if let Some(n) = value.as_u64() {
            return Ok(n);
        }
    }
    let Some(n) = value.as_f64() else {
        return Err(IngestError::invalid(key, "expected a number"));
    };
    if n < 0.0 {
        return Err(IngestError::invalid(key, "must not be negative"));
    }
    let scaled = (n * unit).round();
    if scaled >= U64_LIMIT {
        return Err(IngestError::invalid(key, "out of range"));
    }
    Ok(scaled as u64)
}

/// Integer field; `3.0` is accepted, `3.7` is not.
fn whole_number(fields: &Map<String, Value>, key: &'static str) -> Result<u64, IngestError> {
    let Some(value) = lookup(fields, &[key]) else {
        return Ok(0);
    };
    if let Some(n) = value.as_u64() {
        return Ok(n);
    }
    match value.as_f64() {
        None => Err(IngestError::invalid(key, "expected a number")),
        Some(n) if n < 0.0 => Err(IngestError::invalid(key, "must not be negative")),
        Some(n) if n.fract() != 0.0 => Err(IngestError::invalid(key, "expected a whole number")),
        Some(n) if n >= U64_LIMIT => Err(IngestError::invalid(key, "out of range")),
        Some(n) => Ok(n as u64),
    }
}

/// RFC 3339 first, then any ISO 8601 form. Timestamps without an offset
/// (python's `datetime.isoformat()`) are taken as UTC.
pub fn parse_timestamp(text: &str) -> Option<OffsetDateTime> {
    let text = text.trim();
    OffsetDateTime::parse(text, &Rfc3339)
        .or_else(|_| OffsetDateTime::parse(text, &Iso8601::DEFAULT))
        .ok()
        .or_else(|| {
            PrimitiveDateTime::parse(text, &Iso8601::DEFAULT)
                .ok()
                .map(PrimitiveDateTime::assume_utc)
        })
}

pub fn format_rfc3339(ts: OffsetDateTime) -> String {
    ts.format(&Rfc3339).unwrap_or_default()
}

#[cfg(test)]
impl Sample {
    /// Minimal sample for unit tests; `seq` lands in `uptime_seconds`.
    pub(crate) fn stub(host_id: &str, seq: u64) -> Self {
        Sample {
            host_id: host_id.to_string(),
            captured_at: OffsetDateTime::UNIX_EPOCH,
            cpu_percent: 0.0,
            memory_percent: 0.0,
            disk_percent: 0.0,
            memory_used_bytes: 0,
            memory_total_bytes: 0,
            disk_used_bytes: 0,
            disk_total_bytes: 0,
            network_sent_bytes: 0,
            network_recv_bytes: 0,
            uptime_seconds: seq,
            os_info: String::new(),
        }
    }
}

fn serialize_rfc3339<S: Serializer>(ts: &OffsetDateTime, serializer: S) -> Result<S::Ok, S::Error> {
    let text = ts.format(&Rfc3339).map_err(serde::ser::Error::custom)?;
    serializer.serialize_str(&text)
}
