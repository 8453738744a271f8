//! Delivery of metric reports to the collector, over HTTP or MQTT.
//! At most once: a failed send is reported and the report discarded.

use crate::config::{AgentConfig, TransportKind};
use crate::metrics::MetricsReport;
use anyhow::{Context, Result};
use reqwest::header::CONTENT_TYPE;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, QoS};
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{error, info};

pub enum Transport {
    Http {
        client: reqwest::Client,
        metrics_url: String,
    },
    Mqtt {
        client: AsyncClient,
        topic: String,
        eventloop: JoinHandle<()>,
    },
}

impl Transport {
    pub fn from_config(config: &AgentConfig, host_id: &str) -> Result<Self> {
        match config.transport {
            TransportKind::Http => {
                let client = reqwest::Client::builder()
                    .timeout(Duration::from_secs(config.request_timeout_secs))
                    .build()
                    .context("Failed to build HTTP client")?;
                Ok(Transport::Http {
                    client,
                    metrics_url: config.metrics_url(),
                })
            }
            TransportKind::Mqtt => {
                let mut opts = MqttOptions::new(
                    format!("fleet-agent-{host_id}"),
                    &config.mqtt.broker_host,
                    config.mqtt.broker_port,
                );
                opts.set_keep_alive(Duration::from_secs(config.mqtt.keep_alive_secs));
                opts.set_clean_session(true);

                let (client, eventloop) = AsyncClient::new(opts, 10);
                Ok(Transport::Mqtt {
                    client,
                    topic: config.mqtt.topic.clone(),
                    eventloop: spawn_eventloop(eventloop),
                })
            }
        }
    }

    /// Connectivity check against the collector's `/test` route. HTTP only.
    pub async fn probe(&self, probe_url: &str) -> Result<()> {
        if let Transport::Http { client, .. } = self {
            let response = client
                .get(probe_url)
                .send()
                .await
                .with_context(|| format!("Collector unreachable at {probe_url}"))?
                .error_for_status()?;
            info!(status = %response.status(), "Collector reachable");
        }
        Ok(())
    }

    pub async fn send(&self, report: &MetricsReport) -> Result<()> {
        let payload = serde_json::to_vec(report).context("Failed to serialize metrics report")?;

        match self {
            Transport::Http { client, metrics_url } => {
                client
                    .post(metrics_url)
                    .header(CONTENT_TYPE, "application/json")
                    .body(payload)
                    .send()
                    .await
                    .context("Failed to post metrics")?
                    .error_for_status()
                    .context("Collector rejected metrics")?;
            }
            Transport::Mqtt { client, topic, .. } => {
                // never waits: with the broker down the request queue fills
                // up and the report is dropped
                client
                    .try_publish(topic.as_str(), QoS::AtLeastOnce, false, payload)
                    .context("Failed to queue metrics for the MQTT broker")?;
            }
        }
        Ok(())
    }

    pub fn shutdown(self) {
        if let Transport::Mqtt { eventloop, .. } = self {
            eventloop.abort();
        }
    }
}

fn spawn_eventloop(mut eventloop: rumqttc::EventLoop) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => info!("Connected to MQTT broker"),
                Ok(_) => {}
                Err(e) => {
                    error!("MQTT connection error: {}", e);
                    tokio::time::sleep(Duration::from_secs(5)).await;
                }
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_http_transport_from_config() {
        let config = AgentConfig {
            collector_url: "http://collector:5000/".into(),
            ..AgentConfig::default()
        };
        match Transport::from_config(&config, "lab").unwrap() {
            Transport::Http { metrics_url, .. } => {
                assert_eq!(metrics_url, "http://collector:5000/api/metrics")
            }
            Transport::Mqtt { .. } => panic!("expected HTTP transport"),
        }
    }

    #[tokio::test]
    async fn test_mqtt_send_does_not_block_while_broker_is_down() {
        let config = AgentConfig {
            transport: TransportKind::Mqtt,
            mqtt: crate::config::MqttConfig {
                broker_host: "127.0.0.1".into(),
                broker_port: 1,
                ..Default::default()
            },
            ..AgentConfig::default()
        };
        let transport = Transport::from_config(&config, "lab").unwrap();
        let report = crate::metrics::tests::report("lab");

        let mut failures = 0;
        for _ in 0..20 {
            let sent = tokio::time::timeout(Duration::from_secs(1), transport.send(&report))
                .await
                .expect("send blocked on an unreachable broker");
            if sent.is_err() {
                failures += 1;
            }
        }
        assert!(failures > 0);
        transport.shutdown();
    }

    #[tokio::test]
    async fn test_unreachable_collector_is_an_error() {
        let config = AgentConfig {
            // nothing listens on the discard port
            collector_url: "http://127.0.0.1:9".into(),
            request_timeout_secs: 1,
            ..AgentConfig::default()
        };
        let transport = Transport::from_config(&config, "lab").unwrap();
        assert!(transport.probe(&config.probe_url()).await.is_err());
    }
}
