//! Agent configuration
//!
//! Read from the TOML file named by `FLEET_AGENT_CONFIG`, otherwise from
//! `<config_dir>/fleet-agent/config.toml`. A missing file means defaults.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

pub const CONFIG_ENV: &str = "FLEET_AGENT_CONFIG";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentConfig {
    pub collector_url: String,
    pub interval_secs: u64,
    pub request_timeout_secs: u64,
    /// Reported host identity; the machine hostname when unset.
    pub host_id: Option<String>,
    pub transport: TransportKind,
    pub mqtt: MqttConfig,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    Http,
    Mqtt,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MqttConfig {
    pub broker_host: String,
    pub broker_port: u16,
    pub topic: String,
    pub keep_alive_secs: u64,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            collector_url: "http://localhost:5000".to_string(),
            interval_secs: 5,
            request_timeout_secs: 5,
            host_id: None,
            transport: TransportKind::Http,
            mqtt: MqttConfig::default(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            broker_host: "127.0.0.1".to_string(),
            broker_port: 1883,
            topic: "fleet/metrics@v1".to_string(),
            keep_alive_secs: 30,
        }
    }
}

impl AgentConfig {
    /// Load config from the env override or the OS-specific location
    pub async fn load() -> Result<Self> {
        let path = match std::env::var(CONFIG_ENV) {
            Ok(path) => PathBuf::from(path),
            Err(_) => Self::config_file_path()?,
        };
        Self::load_from(&path).await
    }

    pub async fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("Invalid config in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        let config: AgentConfig = toml::from_str(content)?;
        if config.interval_secs == 0 {
            anyhow::bail!("interval_secs must be > 0");
        }
        Ok(config)
    }

    pub fn config_file_path() -> Result<PathBuf> {
        let mut path = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;

        path.push("fleet-agent");
        path.push("config.toml");
        Ok(path)
    }

    /// Configured host id, else the machine hostname.
    pub fn resolve_host_id(&self) -> Result<String> {
        if let Some(id) = self.host_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            return Ok(id.to_string());
        }
        let name = hostname::get().context("Failed to read hostname")?;
        Ok(name.to_string_lossy().into_owned())
    }

    pub fn metrics_url(&self) -> String {
        format!("{}/api/metrics", self.collector_url.trim_end_matches('/'))
    }

    pub fn probe_url(&self) -> String {
        format!("{}/test", self.collector_url.trim_end_matches('/'))
    }
}
