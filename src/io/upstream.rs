//! REST-backed durable store
//!
//! Reads go to a PostgREST-style table endpoint:
//! `GET {query_url}/rest/v1/{table}?order=received_at.desc&limit=1`
//! authenticated with `apikey` + bearer headers. Writes go to an ingest
//! function: `POST {ingest_url}` with an `X-API-Key` header and body
//! `{device_id, temperature, humidity, co2}`.

use crate::domain::types::{epoch_ms, Measurements, Reading, SourceId};
use crate::infra::config::Config;
use crate::services::store::{ReadingBackend, StoreError};
use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;
use tracing::debug;
use url::Url;

/// Row shape returned by the table endpoint; missing metrics read as 0
#[derive(Debug, Clone, Deserialize)]
pub struct TelemetryRow {
    #[serde(default)]
    pub device_id: Option<String>,
    #[serde(default)]
    pub temperature: Option<f64>,
    #[serde(default)]
    pub humidity: Option<f64>,
    #[serde(default)]
    pub co2: Option<f64>,
    #[serde(default)]
    pub received_at: Option<String>,
}

impl TelemetryRow {
    /// `received_at` falls back to `now_ms` when absent or unparseable
    pub fn into_reading(self, now_ms: u64) -> Reading {
        let received_at = self
            .received_at
            .as_deref()
            .and_then(|s| OffsetDateTime::parse(s, &Rfc3339).ok())
            .map(|t| (t.unix_timestamp_nanos() / 1_000_000).max(0) as u64)
            .unwrap_or(now_ms);

        Reading::new(
            self.device_id.filter(|s| !s.is_empty()).map(SourceId),
            Measurements::new(
                self.temperature.unwrap_or(0.0),
                self.co2.unwrap_or(0.0),
                self.humidity.unwrap_or(0.0),
            ),
            received_at,
        )
    }
}

#[derive(Debug, Serialize)]
struct IngestBody<'a> {
    device_id: &'a str,
    temperature: f64,
    humidity: f64,
    co2: f64,
}

#[derive(Clone, Copy)]
enum Filter<'a> {
    Any,
    Source(Option<&'a SourceId>),
}

pub struct RestStore {
    client: Client,
    query_url: String,
    ingest_url: String,
    table: String,
    api_key: Option<String>,
}

impl RestStore {
    pub fn from_config(config: &Config) -> Result<Self, StoreError> {
        let client = Client::builder()
            .timeout(Duration::from_millis(config.upstream_timeout_ms()))
            .build()
            .map_err(|e| StoreError::UpstreamUnavailable(format!("http client: {e}")))?;

        Ok(Self {
            client,
            query_url: config.upstream_query_url().trim_end_matches('/').to_string(),
            ingest_url: config.upstream_ingest_url().to_string(),
            table: config.upstream_table().to_string(),
            api_key: config.upstream_api_key().map(str::to_string),
        })
    }

    fn table_url(&self, filter: Filter<'_>) -> Result<Url, StoreError> {
        if self.query_url.is_empty() {
            return Err(StoreError::UpstreamUnavailable("query_url not configured".to_string()));
        }
        let base = format!("{}/rest/v1/{}", self.query_url, self.table);
        let mut url = Url::parse(&base)
            .map_err(|e| StoreError::UpstreamUnavailable(format!("bad query_url: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs.append_pair("order", "received_at.desc");
            pairs.append_pair("limit", "1");
            match filter {
                Filter::Any => {}
                Filter::Source(Some(id)) => {
                    pairs.append_pair("device_id", &format!("eq.{id}"));
                }
                Filter::Source(None) => {
                    pairs.append_pair("device_id", "is.null");
                }
            }
        }
        Ok(url)
    }

    async fn fetch_one(&self, filter: Filter<'_>) -> Result<Option<Reading>, StoreError> {
        let url = self.table_url(filter)?;
        let mut request = self.client.get(url.clone());
        if let Some(key) = &self.api_key {
            request = request.header("apikey", key).bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::UpstreamUnavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(StoreError::UpstreamUnavailable(format!("{status}: {body}")));
        }

        let rows: Vec<TelemetryRow> =
            response.json().await.map_err(|e| StoreError::Malformed(e.to_string()))?;
        debug!(url = %url, rows = %rows.len(), "upstream_query_ok");
        Ok(rows.into_iter().next().map(|row| row.into_reading(epoch_ms())))
    }
}

#[async_trait]
impl ReadingBackend for RestStore {
    fn name(&self) -> &'static str {
        "rest"
    }

    async fn get(&self, source: Option<&SourceId>) -> Result<Option<Reading>, StoreError> {
        self.fetch_one(Filter::Source(source)).await
    }

    async fn latest(&self) -> Result<Option<Reading>, StoreError> {
        self.fetch_one(Filter::Any).await
    }

    async fn put(&self, reading: &Reading) -> Result<(), StoreError> {
        if self.ingest_url.is_empty() {
            return Err(StoreError::UpstreamUnavailable("ingest_url not configured".to_string()));
        }
        let body = IngestBody {
            device_id: reading.source_id.as_ref().map(SourceId::as_str).unwrap_or("unknown"),
            temperature: reading.measurements.temperature,
            humidity: reading.measurements.humidity,
            co2: reading.measurements.co2,
        };

        let mut request = self.client.post(&self.ingest_url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.header("X-API-Key", key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| StoreError::UpstreamUnavailable(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(StoreError::UpstreamUnavailable(format!("ingest returned {status}")));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> RestStore {
        let config = Config::from_toml_str(
            r#"
            [upstream]
            enabled = true
            query_url = "https://db.example.com/"
            ingest_url = "https://db.example.com/functions/v1/telemetry-ingest"
            api_key = "secret"
            "#,
            "test",
        )
        .unwrap();
        RestStore::from_config(&config).unwrap()
    }

    #[test]
    fn test_row_parsing() {
        let row: TelemetryRow = serde_json::from_str(
            r#"{"device_id":"AA:BB","temperature":22.5,"humidity":40,"co2":650,
                "received_at":"2024-05-01T12:00:00Z"}"#,
        )
        .unwrap();
        let reading = row.into_reading(7);
        assert_eq!(reading.source_id, Some(SourceId::from("AA:BB")));
        assert_eq!(reading.measurements, Measurements::new(22.5, 650.0, 40.0));
        assert_eq!(reading.received_at, 1_714_564_800_000);
    }

    #[test]
    fn test_row_missing_fields_default() {
        let row: TelemetryRow = serde_json::from_str(r#"{"co2":null}"#).unwrap();
        let reading = row.into_reading(99);
        assert_eq!(reading.source_id, None);
        assert_eq!(reading.measurements, Measurements::default());
        assert_eq!(reading.received_at, 99);
    }

    #[test]
    fn test_table_url() {
        let store = store();
        let latest = store.table_url(Filter::Any).unwrap();
        assert_eq!(
            latest.as_str(),
            "https://db.example.com/rest/v1/telemetry?order=received_at.desc&limit=1"
        );

        let id = SourceId::from("room 4");
        let filtered = store.table_url(Filter::Source(Some(&id))).unwrap();
        assert!(filtered.as_str().ends_with("&device_id=eq.room+4"));
    }

    #[tokio::test]
    async fn test_unconfigured_query_url_is_unavailable() {
        let store = RestStore::from_config(&Config::default()).unwrap();
        assert!(matches!(store.latest().await, Err(StoreError::UpstreamUnavailable(_))));
    }
}
