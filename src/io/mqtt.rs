//! MQTT transport adapter
//!
//! Inbound: sensors publish the same JSON payload they would POST over HTTP;
//! every message runs through the shared ingestion gate.
//! Outbound: accepted readings can be republished to a topic by a broadcaster
//! subscriber, so MQTT consumers see the same stream as SSE viewers.

use crate::domain::types::{Reading, ReadingPayload};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::services::broadcaster::{Broadcaster, Subscription};
use crate::services::ingest::{IngestOutcome, IngestionGate};
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

fn mqtt_options(config: &Config, client_id: String) -> MqttOptions {
    let mut mqttoptions = MqttOptions::new(client_id, config.mqtt_host(), config.mqtt_port());
    mqttoptions.set_keep_alive(Duration::from_secs(30));

    if let (Some(username), Some(password)) = (config.mqtt_username(), config.mqtt_password()) {
        mqttoptions.set_credentials(username, password);
    }
    mqttoptions
}

/// Run one MQTT message through the gate
///
/// Returns the outcome for accepted payloads; rejects are logged and dropped
/// since there is no channel to answer the publisher on.
pub fn handle_message(
    gate: &IngestionGate,
    metrics: &Metrics,
    topic: &str,
    payload: &[u8],
) -> Option<IngestOutcome> {
    metrics.record_mqtt_message();
    match gate.ingest(payload) {
        Ok(outcome) => Some(outcome),
        Err(e) => {
            debug!(topic = %topic, error = %e, "mqtt_payload_rejected");
            None
        }
    }
}

/// Subscribe to the sensor topic and feed the ingestion gate
pub async fn start_mqtt_client(
    config: &Config,
    gate: Arc<IngestionGate>,
    metrics: Arc<Metrics>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let client_id = format!("{}-ingest-{}", config.site_id(), std::process::id());
    let (client, mut eventloop) = AsyncClient::new(mqtt_options(config, client_id), 100);
    client.subscribe(config.mqtt_topic(), QoS::AtMostOnce).await?;

    info!(topic = %config.mqtt_topic(), host = %config.mqtt_host(), port = %config.mqtt_port(), "mqtt_client_subscribed");

    let mut last_reject_warn = Instant::now() - Duration::from_secs(2);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("mqtt_shutdown");
                    return Ok(());
                }
            }
            result = eventloop.poll() => {
                match result {
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        if handle_message(&gate, &metrics, &publish.topic, &publish.payload).is_none()
                            && last_reject_warn.elapsed() > Duration::from_secs(1)
                        {
                            warn!(topic = %publish.topic, "mqtt_invalid_payload");
                            last_reject_warn = Instant::now();
                        }
                    }
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        error!(error = %e, "mqtt_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }
}

/// JSON body republished for each accepted reading
pub fn republish_body(reading: &Reading) -> Result<Vec<u8>, serde_json::Error> {
    serde_json::to_vec(&ReadingPayload::from(reading))
}

/// Broadcaster subscriber that mirrors accepted readings onto an MQTT topic
pub struct MqttRepublisher {
    client: AsyncClient,
    topic: String,
    subscription: Subscription,
}

impl MqttRepublisher {
    /// Returns `None` when no republish topic is configured or push is disabled
    pub fn new(config: &Config, broadcaster: &Broadcaster) -> Option<Self> {
        let topic = config.mqtt_republish_topic()?.to_string();
        let subscription = match broadcaster.subscribe() {
            Ok(subscription) => subscription,
            Err(e) => {
                warn!(error = %e, "mqtt_republish_disabled");
                return None;
            }
        };

        let client_id = format!("{}-republish-{}", config.site_id(), std::process::id());
        let (client, eventloop) = AsyncClient::new(mqtt_options(config, client_id), 100);

        tokio::spawn(async move {
            let mut eventloop = eventloop;
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        info!("mqtt_republish_connected");
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!(error = %e, "mqtt_republish_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });

        Some(Self { client, topic, subscription })
    }

    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(topic = %self.topic, subscriber = %self.subscription.id(), "mqtt_republish_started");

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mqtt_republish_shutdown");
                        return;
                    }
                }
                reading = self.subscription.recv() => {
                    let Some(reading) = reading else {
                        info!("mqtt_republish_unsubscribed");
                        return;
                    };
                    match republish_body(&reading) {
                        Ok(body) => {
                            if let Err(e) =
                                self.client.publish(&self.topic, QoS::AtMostOnce, false, body).await
                            {
                                warn!(error = %e, "mqtt_republish_failed");
                            }
                        }
                        Err(e) => warn!(error = %e, "mqtt_republish_encode_failed"),
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{Measurements, SourceId};
    use crate::services::store::MemoryStore;

    fn gate(metrics: Arc<Metrics>) -> IngestionGate {
        let broadcaster = Arc::new(Broadcaster::new(4, true, metrics.clone()));
        IngestionGate::new(Arc::new(MemoryStore::new()), broadcaster, metrics)
    }

    #[test]
    fn test_message_goes_through_gate() {
        let metrics = Arc::new(Metrics::new());
        let gate = gate(metrics.clone());

        let outcome = handle_message(
            &gate,
            &metrics,
            "sensors/room-1/telemetry",
            br#"{"temperature":21,"co2":610,"humidity":44,"device_id":"room-1"}"#,
        );
        assert!(matches!(outcome, Some(IngestOutcome::Accepted(_))));
        assert!(gate.store().get(Some(&SourceId::from("room-1"))).is_some());

        assert!(handle_message(&gate, &metrics, "sensors/x/telemetry", b"garbage").is_none());

        let summary = metrics.snapshot(0);
        assert_eq!(summary.mqtt_messages, 2);
        assert_eq!(summary.rejected, 1);
    }

    #[test]
    fn test_republish_body_shape() {
        let reading =
            Reading::new(Some(SourceId::from("d1")), Measurements::new(20.0, 500.0, 40.0), 5);
        let json: serde_json::Value = serde_json::from_slice(&republish_body(&reading).unwrap()).unwrap();
        assert_eq!(json["device_id"], "d1");
        assert_eq!(json["co2"], 500.0);
        assert_eq!(json["ts"], 5);
    }
}
