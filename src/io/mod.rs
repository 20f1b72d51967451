//! IO modules - external system interfaces
//!
//! - `http` - HTTP server: ingest, query, SSE, layout, status and metrics routes
//! - `sse` - Server-Sent Events framing and decoding
//! - `mqtt` - MQTT ingest adapter and reading republisher
//! - `upstream` - REST client for the durable store
//! - `mirror` - Write-through queue from the ingestion gate to the durable store
//! - `prometheus` - Prometheus text exposition
//! - `dashboard_client` - HTTP/SSE client feeding dashboard reconcilers

pub mod dashboard_client;
pub mod http;
pub mod mirror;
pub mod mqtt;
pub mod prometheus;
pub mod sse;
pub mod upstream;

pub use dashboard_client::{DashboardClient, FeedEvent};
pub use http::{serve, start_http_server, AppState};
pub use mirror::{create_mirror, MirrorSender, MirrorWorker};
pub use mqtt::MqttRepublisher;
pub use upstream::RestStore;
