//! Shared types for the sensor gateway

use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// CO₂ level above which dashboards raise the air-quality alert (ppm)
pub const CO2_ALERT_THRESHOLD_PPM: f64 = 800.0;

/// Current wall-clock time in epoch milliseconds
pub fn epoch_ms() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).unwrap_or_default().as_millis() as u64
}

/// Newtype wrapper for the logical source of a reading (device id or MAC)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SourceId(pub String);

impl SourceId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for SourceId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

/// The three scalar metrics every station reports together
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Measurements {
    pub temperature: f64,
    pub co2: f64,
    pub humidity: f64,
}

impl Measurements {
    pub fn new(temperature: f64, co2: f64, humidity: f64) -> Self {
        Self { temperature, co2, humidity }
    }

    /// True when at least one metric is non-zero (placeholder readings are all zeros)
    pub fn is_real(&self) -> bool {
        self.temperature != 0.0 || self.co2 != 0.0 || self.humidity != 0.0
    }

    pub fn co2_alert(&self) -> bool {
        self.co2 > CO2_ALERT_THRESHOLD_PPM
    }
}

/// One accepted telemetry snapshot
///
/// `received_at` is assigned by the gateway, never by the sender.
#[derive(Debug, Clone, PartialEq)]
pub struct Reading {
    pub source_id: Option<SourceId>,
    pub measurements: Measurements,
    /// Server receipt time (epoch ms)
    pub received_at: u64,
}

impl Reading {
    pub fn new(source_id: Option<SourceId>, measurements: Measurements, received_at: u64) -> Self {
        Self { source_id, measurements, received_at }
    }
}

/// Wire shape of a reading, shared by the query response and the event stream
///
/// `mac` mirrors `device_id` for dashboards written against the older field name.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReadingPayload {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub mac: Option<String>,
    pub temperature: f64,
    pub co2: f64,
    pub humidity: f64,
    /// Receipt timestamp (epoch ms)
    pub ts: u64,
}

impl ReadingPayload {
    /// Zero-valued payload used when no sensor has reported yet
    pub fn empty(ts: u64) -> Self {
        Self { device_id: None, mac: None, temperature: 0.0, co2: 0.0, humidity: 0.0, ts }
    }

    pub fn measurements(&self) -> Measurements {
        Measurements::new(self.temperature, self.co2, self.humidity)
    }
}

impl From<&Reading> for ReadingPayload {
    fn from(reading: &Reading) -> Self {
        let id = reading.source_id.as_ref().map(|s| s.0.clone());
        Self {
            device_id: id.clone(),
            mac: id,
            temperature: reading.measurements.temperature,
            co2: reading.measurements.co2,
            humidity: reading.measurements.humidity,
            ts: reading.received_at,
        }
    }
}

/// Response body for the latest-reading query
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryResponse {
    pub ok: bool,
    pub has_reading: bool,
    pub reading: ReadingPayload,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl QueryResponse {
    /// Build a response from an optional stored reading
    ///
    /// An empty store still yields a fully populated zero reading, never a null one.
    pub fn from_reading(reading: Option<&Reading>, now_ms: u64) -> Self {
        match reading {
            Some(reading) => Self {
                ok: true,
                has_reading: true,
                reading: ReadingPayload::from(reading),
                message: None,
                error: None,
            },
            None => Self {
                ok: true,
                has_reading: false,
                reading: ReadingPayload::empty(now_ms),
                message: Some("No sensor data received yet".to_string()),
                error: None,
            },
        }
    }

    pub fn upstream_error(now_ms: u64) -> Self {
        Self {
            ok: false,
            has_reading: false,
            reading: ReadingPayload::empty(now_ms),
            message: None,
            error: Some("upstream_unavailable".to_string()),
        }
    }

    /// Measurements worth reconciling, or None for error / empty responses
    pub fn observed(&self) -> Option<Measurements> {
        (self.ok && self.has_reading).then(|| self.reading.measurements())
    }
}

/// Response body for the ingest endpoints
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestResponse {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl IngestResponse {
    pub fn accepted(message: &str) -> Self {
        Self { ok: true, message: Some(message.to_string()), error: None }
    }

    pub fn rejected(error: &str) -> Self {
        Self { ok: false, message: None, error: Some(error.to_string()) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_query_has_zero_reading() {
        let response = QueryResponse::from_reading(None, 1234);
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["ok"], true);
        assert_eq!(json["hasReading"], false);
        assert_eq!(json["reading"]["temperature"], 0.0);
        assert_eq!(json["reading"]["co2"], 0.0);
        assert_eq!(json["reading"]["humidity"], 0.0);
        assert_eq!(json["reading"]["ts"], 1234);
        assert!(response.observed().is_none());
    }

    #[test]
    fn test_query_from_reading_mirrors_source_fields() {
        let reading = Reading::new(
            Some(SourceId::from("AA:BB:CC:DD:EE:FF")),
            Measurements::new(22.5, 650.0, 40.0),
            42,
        );
        let response = QueryResponse::from_reading(Some(&reading), 99);

        assert!(response.has_reading);
        assert_eq!(response.reading.device_id.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(response.reading.mac.as_deref(), Some("AA:BB:CC:DD:EE:FF"));
        assert_eq!(response.reading.ts, 42);
        assert_eq!(response.observed(), Some(Measurements::new(22.5, 650.0, 40.0)));
    }

    #[test]
    fn test_co2_alert_threshold_is_exclusive() {
        assert!(!Measurements::new(20.0, 800.0, 40.0).co2_alert());
        assert!(Measurements::new(20.0, 800.1, 40.0).co2_alert());
    }

    #[test]
    fn test_is_real() {
        assert!(!Measurements::default().is_real());
        assert!(Measurements::new(0.0, 0.0, 0.1).is_real());
    }

    #[test]
    fn test_ingest_response_skips_absent_fields() {
        let json = serde_json::to_string(&IngestResponse::rejected("Invalid payload")).unwrap();
        assert_eq!(json, r#"{"ok":false,"error":"Invalid payload"}"#);
    }
}
