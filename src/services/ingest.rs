//! Ingestion gate - validates sensor payloads and records accepted readings
//!
//! Every transport (HTTP, MQTT) funnels raw bodies through `IngestionGate::ingest`.
//! A payload is one of:
//! - a reading: `temperature`, `co2` and `humidity` all present and numeric
//! - a heartbeat: a non-empty `message` string and none of the metric fields
//! - invalid: anything else
//!
//! Accepted readings get a server-side timestamp, replace the store entry for
//! their source, are fanned out to live viewers, and are queued for the
//! upstream mirror when one is configured.

use crate::domain::types::{epoch_ms, Measurements, Reading, SourceId};
use crate::infra::metrics::Metrics;
use crate::io::mirror::MirrorSender;
use crate::services::broadcaster::Broadcaster;
use crate::services::store::MemoryStore;
use serde::Deserialize;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, info};

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum IngestError {
    #[error("invalid payload: {0}")]
    InvalidPayload(String),
}

/// Validated payload, before a timestamp is assigned
#[derive(Debug, Clone, PartialEq)]
pub enum Payload {
    Reading { source_id: Option<SourceId>, measurements: Measurements },
    Heartbeat(String),
}

#[derive(Debug, Clone, PartialEq)]
pub enum IngestOutcome {
    Accepted(Arc<Reading>),
    Heartbeat(String),
}

#[derive(Debug, Deserialize)]
struct RawPayload {
    #[serde(default)]
    temperature: Option<Value>,
    #[serde(default)]
    co2: Option<Value>,
    #[serde(default)]
    humidity: Option<Value>,
    #[serde(default)]
    device_id: Option<Value>,
    #[serde(default)]
    mac: Option<Value>,
    #[serde(default)]
    message: Option<Value>,
}

fn non_empty_str(value: Option<&Value>) -> Option<&str> {
    value.and_then(Value::as_str).map(str::trim).filter(|s| !s.is_empty())
}

fn numeric_field(value: Option<&Value>, field: &str) -> Result<f64, IngestError> {
    value
        .and_then(Value::as_f64)
        .ok_or_else(|| IngestError::InvalidPayload(format!("missing or non-numeric `{field}`")))
}

/// Validate and normalize a raw ingest body
pub fn parse_payload(body: &[u8]) -> Result<Payload, IngestError> {
    let value: Value = serde_json::from_slice(body)
        .map_err(|e| IngestError::InvalidPayload(format!("malformed JSON: {e}")))?;
    if !value.is_object() {
        return Err(IngestError::InvalidPayload("body is not a JSON object".to_string()));
    }
    let raw: RawPayload = serde_json::from_value(value)
        .map_err(|e| IngestError::InvalidPayload(format!("unexpected shape: {e}")))?;

    let has_metrics = raw.temperature.is_some() || raw.co2.is_some() || raw.humidity.is_some();
    if !has_metrics {
        if let Some(message) = non_empty_str(raw.message.as_ref()) {
            return Ok(Payload::Heartbeat(message.to_string()));
        }
    }

    // co2 first: it is the field older firmware is known to omit
    let co2 = numeric_field(raw.co2.as_ref(), "co2")?;
    let temperature = numeric_field(raw.temperature.as_ref(), "temperature")?;
    let humidity = numeric_field(raw.humidity.as_ref(), "humidity")?;

    let source_id = non_empty_str(raw.device_id.as_ref())
        .or_else(|| non_empty_str(raw.mac.as_ref()))
        .map(SourceId::from);

    Ok(Payload::Reading { source_id, measurements: Measurements::new(temperature, co2, humidity) })
}

/// Single entry point for every ingest transport
pub struct IngestionGate {
    store: Arc<MemoryStore>,
    broadcaster: Arc<Broadcaster>,
    mirror: Option<MirrorSender>,
    metrics: Arc<Metrics>,
}

impl IngestionGate {
    pub fn new(
        store: Arc<MemoryStore>,
        broadcaster: Arc<Broadcaster>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self { store, broadcaster, mirror: None, metrics }
    }

    /// Forward accepted readings to the durable store
    pub fn with_mirror(mut self, mirror: MirrorSender) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn store(&self) -> &Arc<MemoryStore> {
        &self.store
    }

    pub fn broadcaster(&self) -> &Arc<Broadcaster> {
        &self.broadcaster
    }

    pub fn ingest(&self, body: &[u8]) -> Result<IngestOutcome, IngestError> {
        let payload = match parse_payload(body) {
            Ok(payload) => payload,
            Err(e) => {
                self.metrics.record_rejected();
                debug!(error = %e, "ingest_rejected");
                return Err(e);
            }
        };

        match payload {
            Payload::Heartbeat(message) => {
                self.metrics.record_heartbeat();
                info!(message = %message, "heartbeat_received");
                Ok(IngestOutcome::Heartbeat(message))
            }
            Payload::Reading { source_id, measurements } => {
                Ok(IngestOutcome::Accepted(self.accept(source_id, measurements)))
            }
        }
    }

    fn accept(&self, source_id: Option<SourceId>, measurements: Measurements) -> Arc<Reading> {
        // Fan-out runs under the store's write lock so pushes follow write order
        let reading = Reading::new(source_id, measurements, epoch_ms());
        let stored = self.store.put_with(reading, |stored| {
            self.broadcaster.publish(stored);
        });
        self.metrics.record_reading_accepted();

        info!(
            source = %stored.source_id.as_ref().map(SourceId::as_str).unwrap_or("-"),
            temperature = %stored.measurements.temperature,
            co2 = %stored.measurements.co2,
            humidity = %stored.measurements.humidity,
            "reading_accepted"
        );

        if let Some(mirror) = &self.mirror {
            mirror.send(stored.clone());
        }
        stored
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::mirror::create_mirror;

    fn gate() -> IngestionGate {
        let metrics = Arc::new(Metrics::new());
        let broadcaster = Arc::new(Broadcaster::new(8, true, metrics.clone()));
        IngestionGate::new(Arc::new(MemoryStore::new()), broadcaster, metrics)
    }

    fn invalid(body: &str) -> bool {
        matches!(parse_payload(body.as_bytes()), Err(IngestError::InvalidPayload(_)))
    }

    #[test]
    fn test_parse_full_reading() {
        let payload = parse_payload(br#"{"temperature":22.5,"co2":650,"humidity":40}"#).unwrap();
        assert_eq!(
            payload,
            Payload::Reading { source_id: None, measurements: Measurements::new(22.5, 650.0, 40.0) }
        );
    }

    #[test]
    fn test_device_id_preferred_over_mac() {
        let payload = parse_payload(
            br#"{"temperature":1,"co2":2,"humidity":3,"mac":"AA:BB","device_id":"room-4"}"#,
        )
        .unwrap();
        let Payload::Reading { source_id, .. } = payload else { panic!("expected reading") };
        assert_eq!(source_id, Some(SourceId::from("room-4")));
    }

    #[test]
    fn test_mac_used_when_device_id_blank() {
        let payload =
            parse_payload(br#"{"temperature":1,"co2":2,"humidity":3,"mac":"AA:BB","device_id":""}"#)
                .unwrap();
        let Payload::Reading { source_id, .. } = payload else { panic!("expected reading") };
        assert_eq!(source_id, Some(SourceId::from("AA:BB")));
    }

    #[test]
    fn test_heartbeat_only_message() {
        assert_eq!(
            parse_payload(br#"{"message":"Station connected"}"#).unwrap(),
            Payload::Heartbeat("Station connected".to_string())
        );
    }

    #[test]
    fn test_invalid_payloads() {
        assert!(invalid(r#"{"temperature":22.5,"humidity":40}"#), "missing co2");
        assert!(invalid(r#"{"temperature":22.5,"co2":"650","humidity":40}"#), "string co2");
        assert!(invalid(r#"{"temperature":22.5,"co2":null,"humidity":40}"#), "null co2");
        assert!(invalid(r#"{"co2":650}"#), "partial metrics");
        assert!(invalid(r#"{"message":"hi","co2":650}"#), "message with partial metrics");
        assert!(invalid(r#"{"message":""}"#), "empty heartbeat");
        assert!(invalid(r#"[22.5, 650, 40]"#), "array body");
        assert!(invalid("not json"));
        assert!(invalid(""));
    }

    #[test]
    fn test_ingest_updates_store() {
        let gate = gate();
        let outcome = gate.ingest(br#"{"temperature":22.5,"co2":650,"humidity":40}"#).unwrap();
        let IngestOutcome::Accepted(reading) = outcome else { panic!("expected accept") };

        let stored = gate.store().get(None).unwrap();
        assert_eq!(stored.measurements, Measurements::new(22.5, 650.0, 40.0));
        assert_eq!(stored.received_at, reading.received_at);
    }

    #[test]
    fn test_received_at_is_monotonic_per_source() {
        let gate = gate();
        let mut previous = 0;
        for co2 in [600, 610, 620, 630] {
            let body = format!(r#"{{"temperature":20,"co2":{co2},"humidity":40,"mac":"AA"}}"#);
            let IngestOutcome::Accepted(reading) = gate.ingest(body.as_bytes()).unwrap() else {
                panic!("expected accept")
            };
            assert!(reading.received_at >= previous);
            previous = reading.received_at;
        }
    }

    #[test]
    fn test_heartbeat_does_not_touch_store() {
        let gate = gate();
        gate.ingest(br#"{"temperature":21,"co2":500,"humidity":45}"#).unwrap();
        let before = gate.store().latest().unwrap();

        let outcome = gate.ingest(br#"{"message":"ping"}"#).unwrap();
        assert_eq!(outcome, IngestOutcome::Heartbeat("ping".to_string()));
        assert_eq!(gate.store().latest().unwrap(), before);
    }

    #[test]
    fn test_rejected_does_not_touch_store() {
        let gate = gate();
        assert!(gate.ingest(br#"{"temperature":21,"humidity":45}"#).is_err());
        assert!(gate.store().latest().is_none());
    }

    #[tokio::test]
    async fn test_accepted_reading_is_fanned_out_heartbeat_is_not() {
        let gate = gate();
        let mut sub = gate.broadcaster().subscribe().unwrap();

        gate.ingest(br#"{"message":"ping"}"#).unwrap();
        assert!(sub.try_recv().is_none());

        gate.ingest(br#"{"temperature":21,"co2":900,"humidity":45}"#).unwrap();
        assert_eq!(sub.recv().await.unwrap().measurements.co2, 900.0);
    }

    #[test]
    fn test_concurrent_ingests_publish_in_store_order() {
        for round in 0..50 {
            let metrics = Arc::new(Metrics::new());
            let broadcaster = Arc::new(Broadcaster::new(1024, true, metrics.clone()));
            let gate = IngestionGate::new(Arc::new(MemoryStore::new()), broadcaster, metrics);
            let mut viewer = gate.broadcaster().subscribe().unwrap();

            std::thread::scope(|s| {
                for t in 0..8 {
                    let gate = &gate;
                    s.spawn(move || {
                        for i in 0..50 {
                            let co2 = 400 + t * 50 + i;
                            let body = format!(
                                r#"{{"temperature":20,"co2":{co2},"humidity":40,"device_id":"d"}}"#
                            );
                            gate.ingest(body.as_bytes()).unwrap();
                        }
                    });
                }
            });

            let mut last = None;
            while let Some(reading) = viewer.try_recv() {
                last = Some(reading);
            }
            let stored = gate.store().latest().unwrap();
            let last = last.unwrap();
            assert!(
                Arc::ptr_eq(&last, &stored),
                "round {round}: viewer last={} store={}",
                last.measurements.co2,
                stored.measurements.co2
            );
        }
    }

    #[tokio::test]
    async fn test_accepted_reading_is_mirrored() {
        let metrics = Arc::new(Metrics::new());
        let upstream = Arc::new(MemoryStore::new());
        let (mirror, worker) = create_mirror(upstream.clone(), metrics.clone(), 4);
        let broadcaster = Arc::new(Broadcaster::new(8, true, metrics.clone()));
        let gate = IngestionGate::new(Arc::new(MemoryStore::new()), broadcaster, metrics)
            .with_mirror(mirror);

        gate.ingest(br#"{"temperature":21,"co2":700,"humidity":45,"device_id":"d1"}"#).unwrap();
        drop(gate);

        let (_tx, rx) = tokio::sync::watch::channel(false);
        worker.run(rx).await;
        let mirrored = upstream.get(Some(&SourceId::from("d1"))).unwrap();
        assert_eq!(mirrored.measurements.co2, 700.0);
    }
}
