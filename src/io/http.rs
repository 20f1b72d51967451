//! HTTP adapter - ingest, query, event stream, layout, status and metrics
//!
//! Plain hyper 1 server: one task per connection, routes matched on
//! method + path. Every response carries permissive CORS headers so browser
//! dashboards on other origins can poll or stream.
//!
//! Routes:
//! - `POST /ingest`, `/api/ingest`, `/api/ingest-http-bridge` - sensor payloads
//! - `GET /api/ingest`, `/api/ingest-http-bridge`, `/api/latest` - latest reading
//! - `GET /events`, `/api/events` - Server-Sent Events
//! - `GET /api/layout[?selected=NAME]` - fleet map
//! - `GET /api/status`, `/health`, `/metrics`

use crate::domain::types::{epoch_ms, IngestResponse, QueryResponse, SourceId};
use crate::infra::config::Config;
use crate::infra::metrics::Metrics;
use crate::io::prometheus::format_prometheus_metrics;
use crate::io::sse::{encode_event, retry_preamble};
use crate::services::broadcaster::SubscribeError;
use crate::services::ingest::{IngestOutcome, IngestionGate};
use crate::services::layout::{FleetLayout, FleetSummary, LayoutError, PlacedNode, RelativeDistance};
use crate::services::store::ReadingBackend;
use bytes::Bytes;
use futures_util::stream::{self, StreamExt};
use http_body_util::combinators::UnsyncBoxBody;
use http_body_util::{BodyExt, Full, LengthLimitError, Limited, StreamBody};
use hyper::body::{Frame, Incoming};
use hyper::header::{CACHE_CONTROL, CONTENT_TYPE};
use hyper::http::response::Builder;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

pub type HttpBody = UnsyncBoxBody<Bytes, Infallible>;

const INGEST_PATHS: [&str; 3] = ["/ingest", "/api/ingest", "/api/ingest-http-bridge"];
const QUERY_PATHS: [&str; 3] = ["/api/ingest", "/api/ingest-http-bridge", "/api/latest"];
const EVENT_PATHS: [&str; 2] = ["/events", "/api/events"];

const ENDPOINTS: &[&str] = &[
    "POST /ingest",
    "POST /api/ingest",
    "POST /api/ingest-http-bridge",
    "GET /api/ingest",
    "GET /api/ingest-http-bridge",
    "GET /api/latest",
    "GET /events",
    "GET /api/events",
    "GET /api/layout",
    "GET /api/status",
    "GET /health",
    "GET /metrics",
];

/// Shared state handed to every connection
pub struct AppState {
    gate: Arc<IngestionGate>,
    query_backend: Arc<dyn ReadingBackend>,
    layout: Arc<FleetLayout>,
    metrics: Arc<Metrics>,
    site_id: String,
    retry_ms: u64,
    max_body_bytes: usize,
    version: String,
}

impl AppState {
    pub fn new(
        config: &Config,
        gate: Arc<IngestionGate>,
        query_backend: Arc<dyn ReadingBackend>,
        layout: Arc<FleetLayout>,
        metrics: Arc<Metrics>,
    ) -> Self {
        Self {
            gate,
            query_backend,
            layout,
            metrics,
            site_id: config.site_id().to_string(),
            retry_ms: config.stream_retry_ms(),
            max_body_bytes: config.max_body_bytes(),
            version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = version.into();
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse<'a> {
    status: &'static str,
    site: &'a str,
    connected_clients: usize,
    push_enabled: bool,
    backend: &'static str,
    sources: usize,
    version: &'a str,
    endpoints: &'static [&'static str],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct LayoutResponse<'a> {
    ok: bool,
    nodes: &'a [PlacedNode],
    summary: FleetSummary,
    #[serde(skip_serializing_if = "Option::is_none")]
    selected: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    relative_distances: Option<Vec<RelativeDistance>>,
}

fn full(body: impl Into<Bytes>) -> HttpBody {
    Full::new(body.into()).boxed_unsync()
}

fn cors(builder: Builder) -> Builder {
    builder
        .header("Access-Control-Allow-Origin", "*")
        .header("Access-Control-Allow-Methods", "GET, POST, OPTIONS")
        .header("Access-Control-Allow-Headers", "Content-Type")
}

fn json_response<T: Serialize>(status: StatusCode, value: &T) -> Response<HttpBody> {
    let body = match serde_json::to_vec(value) {
        Ok(body) => body,
        Err(e) => {
            error!(error = %e, "response_serialize_failed");
            return text_response(StatusCode::INTERNAL_SERVER_ERROR, "serialization error");
        }
    };
    cors(Response::builder())
        .status(status)
        .header(CONTENT_TYPE, "application/json")
        .body(full(body))
        .expect("static response should not fail")
}

fn text_response(status: StatusCode, body: &'static str) -> Response<HttpBody> {
    cors(Response::builder())
        .status(status)
        .header(CONTENT_TYPE, "text/plain; charset=utf-8")
        .body(full(body))
        .expect("static response should not fail")
}

fn query_param(query: Option<&str>, key: &str) -> Option<String> {
    url::form_urlencoded::parse(query?.as_bytes())
        .find(|(k, _)| k == key)
        .map(|(_, v)| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

fn is_known_path(path: &str) -> bool {
    INGEST_PATHS.contains(&path)
        || QUERY_PATHS.contains(&path)
        || EVENT_PATHS.contains(&path)
        || matches!(path, "/api/layout" | "/api/status" | "/health" | "/metrics")
}

async fn handle_request(
    req: Request<Incoming>,
    state: Arc<AppState>,
) -> Result<Response<HttpBody>, Infallible> {
    let method = req.method().clone();
    let path = req.uri().path().to_string();
    let query = req.uri().query().map(str::to_string);

    let response = match (&method, path.as_str()) {
        (&Method::OPTIONS, p) if is_known_path(p) => {
            cors(Response::builder())
                .status(StatusCode::OK)
                .body(full(""))
                .expect("static response should not fail")
        }
        (&Method::POST, p) if INGEST_PATHS.contains(&p) => handle_ingest(req, &state).await,
        (&Method::GET, p) if QUERY_PATHS.contains(&p) => {
            handle_query(&state, query_param(query.as_deref(), "device_id")).await
        }
        (&Method::GET, p) if EVENT_PATHS.contains(&p) => handle_events(&state),
        (&Method::GET, "/api/layout") => {
            handle_layout(&state, query_param(query.as_deref(), "selected"))
        }
        (&Method::GET, "/api/status") => handle_status(&state),
        (&Method::GET, "/health") => text_response(StatusCode::OK, "ok"),
        (&Method::GET, "/metrics") => {
            let summary = state.metrics.snapshot(state.gate.broadcaster().subscriber_count());
            cors(Response::builder())
                .status(StatusCode::OK)
                .header(CONTENT_TYPE, "text/plain; version=0.0.4; charset=utf-8")
                .body(full(format_prometheus_metrics(&summary, &state.site_id)))
                .expect("static response should not fail")
        }
        (_, p) if is_known_path(p) => json_response(
            StatusCode::METHOD_NOT_ALLOWED,
            &IngestResponse::rejected("Method not allowed"),
        ),
        _ => text_response(StatusCode::NOT_FOUND, "Not Found"),
    };

    debug!(method = %method, path = %path, status = %response.status().as_u16(), "http_request");
    Ok(response)
}

async fn handle_ingest(req: Request<Incoming>, state: &AppState) -> Response<HttpBody> {
    let body = match Limited::new(req.into_body(), state.max_body_bytes).collect().await {
        Ok(collected) => collected.to_bytes(),
        Err(e) => {
            state.metrics.record_rejected();
            if e.downcast_ref::<LengthLimitError>().is_some() {
                warn!(limit = %state.max_body_bytes, "ingest_body_too_large");
                return json_response(
                    StatusCode::PAYLOAD_TOO_LARGE,
                    &IngestResponse::rejected("Payload too large"),
                );
            }
            debug!(error = %e, "ingest_body_read_failed");
            return json_response(StatusCode::BAD_REQUEST, &IngestResponse::rejected("Invalid payload"));
        }
    };

    match state.gate.ingest(&body) {
        Ok(IngestOutcome::Accepted(_)) => {
            json_response(StatusCode::OK, &IngestResponse::accepted("Data received"))
        }
        Ok(IngestOutcome::Heartbeat(_)) => {
            json_response(StatusCode::OK, &IngestResponse::accepted("Connection message received"))
        }
        Err(_) => json_response(StatusCode::BAD_REQUEST, &IngestResponse::rejected("Invalid payload")),
    }
}

async fn handle_query(state: &AppState, device_id: Option<String>) -> Response<HttpBody> {
    state.metrics.record_query();
    let source = device_id.map(SourceId);
    let result = match &source {
        Some(id) => state.query_backend.get(Some(id)).await,
        None => state.query_backend.latest().await,
    };

    match result {
        Ok(reading) => {
            json_response(StatusCode::OK, &QueryResponse::from_reading(reading.as_ref(), epoch_ms()))
        }
        Err(e) => {
            state.metrics.record_upstream_failure();
            warn!(backend = %state.query_backend.name(), error = %e, "query_backend_failed");
            json_response(StatusCode::BAD_GATEWAY, &QueryResponse::upstream_error(epoch_ms()))
        }
    }
}

fn handle_events(state: &AppState) -> Response<HttpBody> {
    let subscription = match state.gate.broadcaster().subscribe() {
        Ok(subscription) => subscription,
        Err(SubscribeError::PushDisabled) => {
            return json_response(
                StatusCode::SERVICE_UNAVAILABLE,
                &IngestResponse::rejected("streaming_unavailable"),
            );
        }
    };
    let subscriber = subscription.id();

    let preamble = stream::once(std::future::ready(Ok::<_, Infallible>(Frame::data(
        retry_preamble(state.retry_ms),
    ))));
    let events = stream::unfold(subscription, move |mut subscription| async move {
        loop {
            let reading = subscription.recv().await?;
            match encode_event(&reading) {
                Ok(frame) => return Some((Ok(Frame::data(frame)), subscription)),
                Err(e) => warn!(subscriber = %subscriber, error = %e, "sse_encode_failed"),
            }
        }
    });

    cors(Response::builder())
        .status(StatusCode::OK)
        .header(CONTENT_TYPE, "text/event-stream")
        .header(CACHE_CONTROL, "no-cache")
        .header("X-Accel-Buffering", "no")
        .body(StreamBody::new(preamble.chain(events)).boxed_unsync())
        .expect("static response should not fail")
}

fn handle_layout(state: &AppState, selected: Option<String>) -> Response<HttpBody> {
    let relative_distances = match selected.as_deref().map(|name| state.layout.relative_to(name)) {
        None => None,
        Some(Ok(distances)) => Some(distances),
        Some(Err(LayoutError::UnknownNode(name))) => {
            debug!(node = %name, "layout_unknown_node");
            return json_response(StatusCode::NOT_FOUND, &IngestResponse::rejected("unknown_node"));
        }
        Some(Err(e)) => {
            warn!(error = %e, "layout_relative_failed");
            return json_response(
                StatusCode::INTERNAL_SERVER_ERROR,
                &IngestResponse::rejected("layout_unavailable"),
            );
        }
    };

    json_response(
        StatusCode::OK,
        &LayoutResponse {
            ok: true,
            nodes: &state.layout.nodes,
            summary: state.layout.summary,
            selected: selected.as_deref(),
            relative_distances,
        },
    )
}

fn handle_status(state: &AppState) -> Response<HttpBody> {
    let broadcaster = state.gate.broadcaster();
    json_response(
        StatusCode::OK,
        &StatusResponse {
            status: "ok",
            site: &state.site_id,
            connected_clients: broadcaster.subscriber_count(),
            push_enabled: broadcaster.is_push_enabled(),
            backend: state.query_backend.name(),
            sources: state.gate.store().source_count(),
            version: &state.version,
            endpoints: ENDPOINTS,
        },
    )
}

/// Serve connections from an already bound listener until shutdown
pub async fn serve(
    listener: TcpListener,
    state: Arc<AppState>,
    mut shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    info!(addr = %listener.local_addr()?, site = %state.site_id, "http_server_started");

    loop {
        tokio::select! {
            result = listener.accept() => {
                match result {
                    Ok((stream, _addr)) => {
                        let io = TokioIo::new(stream);
                        let state = state.clone();
                        tokio::spawn(async move {
                            let service = service_fn(move |req| {
                                let state = state.clone();
                                async move { handle_request(req, state).await }
                            });
                            if let Err(e) = http1::Builder::new()
                                .serve_connection(io, service)
                                .await
                            {
                                debug!(error = %e, "http_connection_error");
                            }
                        });
                    }
                    Err(e) => {
                        error!(error = %e, "http_accept_error");
                    }
                }
            }
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    info!("http_server_shutdown");
                    return Ok(());
                }
            }
        }
    }
}

/// Bind the configured address and serve
pub async fn start_http_server(
    config: &Config,
    state: Arc<AppState>,
    shutdown: watch::Receiver<bool>,
) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let addr: SocketAddr =
        format!("{}:{}", config.http_bind_address(), config.http_port()).parse()?;
    let listener = TcpListener::bind(addr).await?;
    serve(listener, state, shutdown).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_query_param() {
        assert_eq!(query_param(Some("device_id=AA%3ABB"), "device_id"), Some("AA:BB".to_string()));
        assert_eq!(query_param(Some("x=1&selected=ESP-02"), "selected"), Some("ESP-02".to_string()));
        assert_eq!(query_param(Some("device_id="), "device_id"), None);
        assert_eq!(query_param(None, "device_id"), None);
    }

    #[test]
    fn test_known_paths() {
        assert!(is_known_path("/api/ingest"));
        assert!(is_known_path("/events"));
        assert!(!is_known_path("/api/unknown"));
    }
}
