//! Station simulator - posts readings to a running gateway
//!
//! Sends a connection heartbeat first, the way real stations announce
//! themselves, then a random walk of readings at a fixed interval.
//!
//! Usage:
//!   cargo run --bin sensor-sim -- --url http://localhost:3000 --device-id lab-1
//!   cargo run --bin sensor-sim -- --count 20 --seed 7 --interval-ms 250

use clap::Parser;
use rand::rngs::StdRng;
use rand::SeedableRng;
use sensor_gateway::domain::types::IngestResponse;
use sensor_gateway::services::simulator::StationWalk;
use serde_json::json;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::fmt::time::UtcTime;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "sensor-sim")]
#[command(about = "Simulated sensor station posting to the gateway")]
struct Args {
    /// Gateway base URL
    #[arg(long, default_value = "http://localhost:3000")]
    url: String,

    /// Device id sent with every reading
    #[arg(long, default_value = "sim-station")]
    device_id: String,

    /// Delay between readings
    #[arg(long, default_value = "1000")]
    interval_ms: u64,

    /// Stop after this many readings (runs forever when omitted)
    #[arg(long)]
    count: Option<u64>,

    /// Seed for a reproducible walk
    #[arg(long)]
    seed: Option<u64>,
}

async fn post(
    client: &reqwest::Client,
    url: &str,
    body: &serde_json::Value,
) -> anyhow::Result<IngestResponse> {
    let response = client.post(url).json(body).send().await?;
    let status = response.status();
    let parsed: IngestResponse = response.json().await?;
    if !status.is_success() {
        anyhow::bail!("gateway returned {status}: {:?}", parsed.error);
    }
    Ok(parsed)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_timer(UtcTime::rfc_3339())
        .with_target(false)
        .init();

    let args = Args::parse();
    let ingest_url = format!("{}/api/ingest", args.url.trim_end_matches('/'));
    let client = reqwest::Client::builder().timeout(Duration::from_secs(5)).build()?;

    let mut rng = match args.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let mut walk = StationWalk::default();

    let hello = json!({ "message": format!("{} connected", args.device_id) });
    match post(&client, &ingest_url, &hello).await {
        Ok(response) => info!(reply = ?response.message, "heartbeat_sent"),
        Err(e) => warn!(error = %e, "heartbeat_failed"),
    }

    let mut ticker = tokio::time::interval(Duration::from_millis(args.interval_ms.max(1)));
    let mut sent = 0u64;
    loop {
        if args.count.is_some_and(|count| sent >= count) {
            break;
        }
        ticker.tick().await;

        let m = walk.next(&mut rng);
        let body = json!({
            "device_id": args.device_id,
            "temperature": m.temperature,
            "co2": m.co2,
            "humidity": m.humidity,
        });
        match post(&client, &ingest_url, &body).await {
            Ok(_) => info!(
                temperature = %m.temperature,
                co2 = %m.co2,
                humidity = %m.humidity,
                "reading_sent"
            ),
            Err(e) => warn!(error = %e, "reading_failed"),
        }
        sent += 1;
    }

    info!(sent = %sent, "sensor-sim done");
    Ok(())
}
