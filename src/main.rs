//! Sensor gateway - ingest, store and fan out environmental telemetry
//!
//! Accepts readings (temperature, CO₂, humidity) from stations over HTTP or
//! MQTT, keeps the latest reading per source, and pushes each accepted reading
//! to live dashboards over Server-Sent Events.
//!
//! Module structure:
//! - `domain/` - Readings, wire payloads, sensor nodes
//! - `io/` - External interfaces (HTTP, SSE, MQTT, durable store)
//! - `services/` - Ingestion gate, store, broadcaster, reconciler, layout
//! - `infra/` - Infrastructure (Config, Metrics)

use clap::Parser;
use sensor_gateway::infra::{Config, Metrics, StoreBackend};
use sensor_gateway::io::{create_mirror, AppState, MqttRepublisher, RestStore};
use sensor_gateway::services::{
    Broadcaster, IngestionGate, LayeredStore, LayoutEngine, MemoryStore, ReadingBackend,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

/// Sensor gateway - telemetry ingest and live fan-out
#[derive(Parser, Debug)]
#[command(name = "sensor-gateway", version, about)]
struct Args {
    /// Path to TOML configuration file (defaults to $CONFIG_FILE or config/dev.toml)
    #[arg(short, long)]
    config: Option<String>,

    /// Emit logs as JSON lines
    #[arg(long)]
    log_json: bool,
}

fn init_tracing(json: bool) {
    // Default: INFO, use RUST_LOG=debug for per-request visibility
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false);

    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    init_tracing(args.log_json);

    info!(git_hash = %env!("GIT_HASH"), "sensor-gateway starting");

    let config_path = args.config.unwrap_or_else(|| Config::resolve_config_path(&[]));
    let config = Config::load_from_path(&config_path);

    info!(
        config_file = %config.config_file(),
        site = %config.site_id(),
        bind = %config.http_bind_address(),
        port = %config.http_port(),
        stream_enabled = %config.stream_enabled(),
        store_backend = ?config.store_backend(),
        upstream_enabled = %config.upstream_enabled(),
        mqtt_enabled = %config.mqtt_enabled(),
        "config_loaded"
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let metrics = Arc::new(Metrics::new());
    let store = Arc::new(MemoryStore::new());
    let broadcaster = Arc::new(Broadcaster::new(
        config.subscriber_buffer(),
        config.stream_enabled(),
        metrics.clone(),
    ));

    let rest = if config.upstream_enabled() || config.store_backend() == StoreBackend::Rest {
        Some(Arc::new(RestStore::from_config(&config)?))
    } else {
        None
    };

    let mut gate = IngestionGate::new(store.clone(), broadcaster.clone(), metrics.clone());
    if let (true, Some(rest)) = (config.upstream_enabled(), &rest) {
        let (mirror, worker) = create_mirror(rest.clone(), metrics.clone(), config.mirror_buffer());
        let mirror_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            worker.run(mirror_shutdown).await;
        });
        gate = gate.with_mirror(mirror);
    }
    let gate = Arc::new(gate);

    // The rest backend still answers from local accepts first
    let query_backend: Arc<dyn ReadingBackend> = match (config.store_backend(), rest) {
        (StoreBackend::Rest, Some(rest)) => {
            if !config.upstream_enabled() {
                warn!("store_backend_rest_without_mirror: local accepts are not written upstream");
            }
            Arc::new(LayeredStore::new(store.clone(), rest))
        }
        _ => store.clone(),
    };

    let layout = Arc::new(LayoutEngine::from_config(&config).compute_for(config.layout_nodes())?);
    info!(
        nodes = %layout.nodes.len(),
        active = %layout.summary.active,
        inactive = %layout.summary.inactive,
        "layout_computed"
    );

    let state = Arc::new(
        AppState::new(&config, gate.clone(), query_backend, layout, metrics.clone())
            .with_version(format!("{} ({})", env!("CARGO_PKG_VERSION"), env!("GIT_HASH"))),
    );

    let http_config = config.clone();
    let http_shutdown = shutdown_rx.clone();
    let http_handle = tokio::spawn(async move {
        if let Err(e) =
            sensor_gateway::io::start_http_server(&http_config, state, http_shutdown).await
        {
            error!(error = %e, "HTTP server error");
        }
    });

    if config.mqtt_enabled() {
        let mqtt_config = config.clone();
        let mqtt_gate = gate.clone();
        let mqtt_metrics = metrics.clone();
        let mqtt_shutdown = shutdown_rx.clone();
        tokio::spawn(async move {
            if let Err(e) = sensor_gateway::io::mqtt::start_mqtt_client(
                &mqtt_config,
                mqtt_gate,
                mqtt_metrics,
                mqtt_shutdown,
            )
            .await
            {
                error!(error = %e, "MQTT client error");
            }
        });

        if let Some(republisher) = MqttRepublisher::new(&config, &broadcaster) {
            let republish_shutdown = shutdown_rx.clone();
            tokio::spawn(async move {
                republisher.run(republish_shutdown).await;
            });
        }
    }

    // Periodic metrics report
    let report_metrics = metrics.clone();
    let report_broadcaster = broadcaster.clone();
    let metrics_interval = config.metrics_interval_secs();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(metrics_interval));
        interval.tick().await;
        loop {
            interval.tick().await;
            report_metrics.report(report_broadcaster.subscriber_count()).log();
        }
    });

    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("shutdown_signal_received");
        let _ = shutdown_tx.send(true);
    });

    http_handle.await?;

    info!("sensor-gateway shutdown complete");
    Ok(())
}
