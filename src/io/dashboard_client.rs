//! HTTP client for dashboards
//!
//! Two feeds drive the reconciler:
//! - poll: query the latest reading on a fixed interval
//! - stream: query once on connect, then follow the SSE stream, reconnecting
//!   after the server's retry hint; falls back to polling if push is disabled
//!
//! Both emit `FeedEvent`s on an mpsc channel so the UI loop owns all state.

use crate::domain::types::{Measurements, QueryResponse, ReadingPayload};
use crate::io::sse::SseDecoder;
use crate::services::layout::{FleetSummary, PlacedNode, RelativeDistance};
use futures_util::StreamExt;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("unexpected status {0}")]
    Status(u16),
    #[error("push delivery is disabled on the gateway")]
    StreamingUnavailable,
    #[error("stream ended")]
    StreamEnded,
}

/// Fleet map as served by `/api/layout`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutView {
    pub nodes: Vec<PlacedNode>,
    pub summary: FleetSummary,
    #[serde(default)]
    pub selected: Option<String>,
    #[serde(default)]
    pub relative_distances: Option<Vec<RelativeDistance>>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum FeedEvent {
    /// Result of one fetch or push; `None` for a failed or empty fetch
    Observation(Option<Measurements>),
    Connected(bool),
}

#[derive(Clone)]
pub struct DashboardClient {
    client: Client,
    base_url: String,
}

impl DashboardClient {
    pub fn new(base_url: &str) -> Result<Self, ClientError> {
        let client = Client::builder().connect_timeout(Duration::from_secs(5)).build()?;
        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string() })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Latest reading; a 502 from a failing backend still parses as a response
    pub async fn fetch_latest(&self) -> Result<QueryResponse, ClientError> {
        let response = self
            .client
            .get(format!("{}/api/latest", self.base_url))
            .timeout(Duration::from_secs(5))
            .send()
            .await?;
        let status = response.status();
        if !(status.is_success() || status == StatusCode::BAD_GATEWAY) {
            return Err(ClientError::Status(status.as_u16()));
        }
        Ok(response.json().await?)
    }

    pub async fn fetch_layout(&self, selected: Option<&str>) -> Result<LayoutView, ClientError> {
        let mut request = self
            .client
            .get(format!("{}/api/layout", self.base_url))
            .timeout(Duration::from_secs(5));
        if let Some(name) = selected {
            request = request.query(&[("selected", name)]);
        }
        let response = request.send().await?;
        if !response.status().is_success() {
            return Err(ClientError::Status(response.status().as_u16()));
        }
        Ok(response.json().await?)
    }

    /// Follow the event stream until it ends
    ///
    /// `Ok` means the receiver went away. `retry` is updated from the server's hint.
    pub async fn stream_events(
        &self,
        tx: &mpsc::Sender<FeedEvent>,
        retry: &mut Duration,
    ) -> Result<(), ClientError> {
        let response = self.client.get(format!("{}/api/events", self.base_url)).send().await?;
        match response.status() {
            StatusCode::SERVICE_UNAVAILABLE => return Err(ClientError::StreamingUnavailable),
            status if !status.is_success() => return Err(ClientError::Status(status.as_u16())),
            _ => {}
        }
        if tx.send(FeedEvent::Connected(true)).await.is_err() {
            return Ok(());
        }

        let mut decoder = SseDecoder::new();
        let mut body = response.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            let events = decoder.push(&chunk);
            if let Some(ms) = decoder.retry_ms() {
                *retry = Duration::from_millis(ms);
            }
            for data in events {
                match serde_json::from_str::<ReadingPayload>(&data) {
                    Ok(payload) => {
                        if tx.send(FeedEvent::Observation(Some(payload.measurements()))).await.is_err() {
                            return Ok(());
                        }
                    }
                    Err(e) => debug!(error = %e, "sse_payload_skipped"),
                }
            }
        }
        Err(ClientError::StreamEnded)
    }
}

async fn poll_once(client: &DashboardClient, last_warn: &mut Instant) -> FeedEvent {
    match client.fetch_latest().await {
        Ok(response) => FeedEvent::Observation(response.observed()),
        Err(e) => {
            if last_warn.elapsed() > Duration::from_secs(5) {
                warn!(error = %e, "dashboard_fetch_failed");
                *last_warn = Instant::now();
            }
            FeedEvent::Observation(None)
        }
    }
}

/// Query the latest reading every `interval` until the receiver goes away
pub async fn run_poll_feed(client: DashboardClient, interval: Duration, tx: mpsc::Sender<FeedEvent>) {
    info!(url = %client.base_url(), interval_ms = %interval.as_millis(), "dashboard_poll_started");
    let mut ticker = tokio::time::interval(interval);
    let mut last_warn = Instant::now() - Duration::from_secs(10);

    loop {
        ticker.tick().await;
        let event = poll_once(&client, &mut last_warn).await;
        let connected = !matches!(event, FeedEvent::Observation(None));
        if tx.send(event).await.is_err() || tx.send(FeedEvent::Connected(connected)).await.is_err() {
            return;
        }
    }
}

/// Query once, then follow pushes; reconnects after the retry hint
pub async fn run_stream_feed(
    client: DashboardClient,
    poll_interval: Duration,
    tx: mpsc::Sender<FeedEvent>,
) {
    info!(url = %client.base_url(), "dashboard_stream_started");
    let mut retry = Duration::from_millis(1000);
    let mut last_warn = Instant::now() - Duration::from_secs(10);

    loop {
        // Pushes carry no history, so catch up on the current state first
        let event = poll_once(&client, &mut last_warn).await;
        if tx.send(event).await.is_err() {
            return;
        }

        match client.stream_events(&tx, &mut retry).await {
            Ok(()) => return,
            Err(ClientError::StreamingUnavailable) => {
                warn!("dashboard_stream_unavailable: falling back to polling");
                run_poll_feed(client, poll_interval, tx).await;
                return;
            }
            Err(e) => {
                if last_warn.elapsed() > Duration::from_secs(5) {
                    warn!(error = %e, "dashboard_stream_disconnected");
                    last_warn = Instant::now();
                }
                if tx.send(FeedEvent::Connected(false)).await.is_err()
                    || tx.send(FeedEvent::Observation(None)).await.is_err()
                {
                    return;
                }
            }
        }

        tokio::time::sleep(retry).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_base_url_trailing_slash() {
        let client = DashboardClient::new("http://localhost:3000/").unwrap();
        assert_eq!(client.base_url(), "http://localhost:3000");
    }

    #[test]
    fn test_layout_view_parses() {
        let json = r#"{
            "ok": true,
            "nodes": [{"name":"ESP-01","status":"active","distance":12.3,
                       "position":{"x":1.0,"y":99.0}}],
            "summary": {"active":1,"inactive":0,"totalDistance":12.3},
            "selected": "ESP-01",
            "relativeDistances": [{"name":"ESP-01","distance":0.0}]
        }"#;
        let view: LayoutView = serde_json::from_str(json).unwrap();
        assert_eq!(view.nodes[0].node.name, "ESP-01");
        assert_eq!(view.nodes[0].position.y, 99.0);
        assert_eq!(view.summary.total_distance, 12.3);
        assert_eq!(view.relative_distances.unwrap()[0].distance, 0.0);
    }

    #[tokio::test]
    async fn test_unreachable_gateway_yields_placeholder() {
        let client = DashboardClient::new("http://127.0.0.1:9").unwrap();
        let mut last_warn = Instant::now();
        assert_eq!(poll_once(&client, &mut last_warn).await, FeedEvent::Observation(None));
    }
}
