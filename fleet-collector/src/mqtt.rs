use crate::config::MqttConf;
use crate::error::IngestError;
use crate::health::HealthTracker;
use crate::ingest::SharedIngestion;
use crate::sample::Sample;
use rumqttc::{AsyncClient, Event, Incoming, MqttOptions, Publish, QoS};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::{self, JoinHandle};
use tracing::{debug, error, info, warn};

const RETRY_DELAY: Duration = Duration::from_secs(2);

/// Subscribes to the metrics topic and feeds every publish through ingestion.
/// Broker errors are retried forever.
pub fn spawn_mqtt_listener(conf: MqttConf, ingestion: SharedIngestion, health: HealthTracker) -> JoinHandle<()> {
    task::spawn(async move {
        let mut opts = MqttOptions::new(&conf.client_id, &conf.host, conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 10);
        info!(host = %conf.host, port = conf.port, topic = %conf.topic, "starting MQTT listener");

        loop {
            match eventloop.poll().await {
                Ok(Event::Incoming(Incoming::ConnAck(_))) => {
                    // subscriptions do not survive a reconnect with a clean session
                    if let Err(e) = client.try_subscribe(&conf.topic, QoS::AtLeastOnce) {
                        error!(error = ?e, topic = %conf.topic, "MQTT subscribe failed");
                    }
                    health.mark_mqtt_connected();
                    info!("MQTT connected");
                }
                Ok(Event::Incoming(Incoming::Publish(p))) if p.topic == conf.topic => {
                    let _ = handle_publish(&ingestion, &p);
                }
                Ok(_) => {}
                Err(e) => {
                    error!(error = ?e, "MQTT error, retrying");
                    health.increment_reconnects();
                    tokio::time::sleep(RETRY_DELAY).await;
                }
            }
        }
    })
}

/// Ingests one MQTT message body. Invalid bodies are logged and dropped.
pub fn handle_publish(ingestion: &SharedIngestion, publish: &Publish) -> Result<Arc<Sample>, IngestError> {
    match ingestion.ingest(&publish.payload) {
        Ok(sample) => {
            debug!(host_id = %sample.host_id, topic = %publish.topic, "sample received over MQTT");
            Ok(sample)
        }
        Err(e) => {
            warn!(error = %e, topic = %publish.topic, "dropping invalid MQTT payload");
            Err(e)
        }
    }
}
