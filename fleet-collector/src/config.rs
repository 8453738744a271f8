use crate::error::ConfigError;
use crate::sweeper::LivenessPolicy;
use serde::{Deserialize, Serialize};
use std::{net::SocketAddr, path::Path};
use tokio::fs;
use tracing::{info, warn};

pub const CONFIG_ENV: &str = "FLEET_COLLECTOR_CONFIG";
pub const DEFAULT_MQTT_TOPIC: &str = "fleet/metrics@v1";

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct CollectorConfig {
    pub listen: String,
    pub retention: RetentionConf,
    pub liveness: LivenessConf,
    pub broadcast: BroadcastConf,
    pub mqtt: Option<MqttConf>,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct RetentionConf {
    pub history_capacity: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct LivenessConf {
    pub soft_threshold_secs: u64,
    pub hard_threshold_secs: u64,
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(default)]
pub struct BroadcastConf {
    pub subscriber_buffer: usize,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct MqttConf {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_topic")]
    pub topic: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
}

fn default_topic() -> String {
    DEFAULT_MQTT_TOPIC.into()
}

fn default_client_id() -> String {
    "fleet-collector".into()
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            listen: "0.0.0.0:5000".into(),
            retention: RetentionConf::default(),
            liveness: LivenessConf::default(),
            broadcast: BroadcastConf::default(),
            mqtt: None,
        }
    }
}

impl Default for RetentionConf {
    fn default() -> Self {
        Self { history_capacity: crate::series::DEFAULT_HISTORY_CAPACITY }
    }
}

impl Default for LivenessConf {
    fn default() -> Self {
        Self {
            soft_threshold_secs: 30,
            hard_threshold_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

impl Default for BroadcastConf {
    fn default() -> Self {
        Self { subscriber_buffer: crate::broadcast::DEFAULT_SUBSCRIBER_BUFFER }
    }
}

impl CollectorConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.retention.history_capacity == 0 {
            return Err(ConfigError::Invalid("retention.history_capacity must be > 0".into()));
        }
        if self.broadcast.subscriber_buffer == 0 {
            return Err(ConfigError::Invalid("broadcast.subscriber_buffer must be > 0".into()));
        }
        let l = &self.liveness;
        if l.soft_threshold_secs == 0 || l.hard_threshold_secs == 0 || l.sweep_interval_secs == 0 {
            return Err(ConfigError::Invalid("liveness durations must be > 0".into()));
        }
        for (name, secs) in [
            ("soft_threshold_secs", l.soft_threshold_secs),
            ("hard_threshold_secs", l.hard_threshold_secs),
        ] {
            if i64::try_from(secs).is_err() {
                return Err(ConfigError::Invalid(format!("liveness.{name} ({secs}) is out of range")));
            }
        }
        if l.hard_threshold_secs < l.soft_threshold_secs {
            return Err(ConfigError::Invalid(format!(
                "liveness.hard_threshold_secs ({}) is below soft_threshold_secs ({})",
                l.hard_threshold_secs, l.soft_threshold_secs
            )));
        }
        self.listen_addr()?;
        Ok(())
    }

    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        self.listen
            .parse()
            .map_err(|_| ConfigError::ListenAddr(self.listen.clone()))
    }

    pub fn liveness_policy(&self) -> LivenessPolicy {
        LivenessPolicy {
            soft_threshold: seconds(self.liveness.soft_threshold_secs),
            hard_threshold: seconds(self.liveness.hard_threshold_secs),
            sweep_interval: std::time::Duration::from_secs(self.liveness.sweep_interval_secs),
        }
    }
}

/// Out-of-range values saturate; `validate` rejects them first.
fn seconds(secs: u64) -> time::Duration {
    time::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX))
}

/// Parses a YAML document. An empty document yields the defaults.
pub fn parse_config(text: &str) -> Result<CollectorConfig, ConfigError> {
    if text.trim().is_empty() {
        return Ok(CollectorConfig::default());
    }
    Ok(serde_yaml::from_str(text)?)
}

/// Reads the file named by `FLEET_COLLECTOR_CONFIG` (default `collector.yaml`).
/// A missing or unreadable file falls back to defaults.
pub async fn load_config() -> CollectorConfig {
    let path = std::env::var(CONFIG_ENV).unwrap_or_else(|_| "collector.yaml".into());
    if !Path::new(&path).exists() {
        info!(path = %path, "no config file, using defaults");
        return CollectorConfig::default();
    }

    let text = match fs::read_to_string(&path).await {
        Ok(text) => text,
        Err(e) => {
            warn!(path = %path, error = %e, "config unreadable, using defaults");
            return CollectorConfig::default();
        }
    };

    parse_config(&text).unwrap_or_else(|e| {
        warn!(path = %path, error = %e, "invalid config, using defaults");
        CollectorConfig::default()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_gives_defaults() {
        let config = parse_config("  \n").unwrap();
        assert_eq!(config, CollectorConfig::default());
        assert_eq!(config.retention.history_capacity, 1000);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn partial_document_keeps_other_defaults() {
        let config = parse_config(
            "listen: 127.0.0.1:8080\nliveness:\n  soft_threshold_secs: 10\nmqtt:\n  host: broker\n  port: 1883\n",
        )
        .unwrap();

        assert_eq!(config.listen_addr().unwrap().port(), 8080);
        assert_eq!(config.liveness.soft_threshold_secs, 10);
        assert_eq!(config.liveness.hard_threshold_secs, 300);
        let mqtt = config.mqtt.unwrap();
        assert_eq!(mqtt.topic, DEFAULT_MQTT_TOPIC);
        assert_eq!(mqtt.client_id, "fleet-collector");
    }

    #[test]
    fn liveness_policy_matches_config() {
        let policy = CollectorConfig::default().liveness_policy();
        assert_eq!(policy, LivenessPolicy::default());
    }

    #[test]
    fn validate_rejects_bad_values() {
        let mut config = CollectorConfig::default();
        config.retention.history_capacity = 0;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = CollectorConfig::default();
        config.liveness.hard_threshold_secs = 10;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let mut config = CollectorConfig::default();
        config.listen = "not an address".into();
        assert!(matches!(config.validate(), Err(ConfigError::ListenAddr(_))));
    }

    #[test]
    fn thresholds_beyond_i64_are_rejected() {
        let mut config = CollectorConfig::default();
        config.liveness.hard_threshold_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        config.liveness.soft_threshold_secs = u64::MAX;
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));

        let policy = config.liveness_policy();
        assert!(policy.hard_threshold.is_positive());
        assert!(policy.soft_threshold.is_positive());
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        assert!(matches!(parse_config("listen: [unclosed"), Err(ConfigError::Parse(_))));
    }
}
