//! Prometheus text exposition for gateway metrics
//!
//! Served at `/metrics` by the HTTP adapter.

use crate::infra::metrics::MetricsSummary;
use std::fmt::Write;

/// Prometheus metric type
enum MetricType {
    Counter,
    Gauge,
}

impl MetricType {
    fn as_str(&self) -> &'static str {
        match self {
            MetricType::Counter => "counter",
            MetricType::Gauge => "gauge",
        }
    }
}

/// Write a simple metric (counter or gauge) with site label
fn write_metric(
    output: &mut String,
    name: &str,
    help: &str,
    typ: MetricType,
    site: &str,
    val: u64,
) {
    let _ = writeln!(output, "# HELP {name} {help}");
    let _ = writeln!(output, "# TYPE {name} {}", typ.as_str());
    let _ = writeln!(output, "{name}{{site=\"{site}\"}} {val}");
}

/// Format metrics in Prometheus text exposition format
pub fn format_prometheus_metrics(summary: &MetricsSummary, site: &str) -> String {
    let mut output = String::with_capacity(4096);

    write_ingest_metrics(&mut output, site, summary);
    write_fanout_metrics(&mut output, site, summary);
    write_upstream_metrics(&mut output, site, summary);

    output
}

fn write_ingest_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "sensor_readings_accepted_total",
        "Readings accepted into the store",
        MetricType::Counter,
        site,
        summary.readings_accepted,
    );
    write_metric(
        output,
        "sensor_heartbeats_total",
        "Heartbeat-only payloads received",
        MetricType::Counter,
        site,
        summary.heartbeats,
    );
    write_metric(
        output,
        "sensor_payloads_rejected_total",
        "Payloads rejected as invalid",
        MetricType::Counter,
        site,
        summary.rejected,
    );
    write_metric(
        output,
        "sensor_queries_total",
        "Latest-reading queries served",
        MetricType::Counter,
        site,
        summary.queries,
    );
    write_metric(
        output,
        "sensor_mqtt_messages_total",
        "Messages received on the MQTT ingest topic",
        MetricType::Counter,
        site,
        summary.mqtt_messages,
    );
}

fn write_fanout_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "sensor_active_subscribers",
        "Live viewers currently subscribed",
        MetricType::Gauge,
        site,
        summary.active_subscribers as u64,
    );
    write_metric(
        output,
        "sensor_fanout_delivered_total",
        "Events handed to subscriber channels",
        MetricType::Counter,
        site,
        summary.fanout_delivered,
    );
    write_metric(
        output,
        "sensor_fanout_dropped_total",
        "Events dropped because a subscriber channel was full",
        MetricType::Counter,
        site,
        summary.fanout_dropped,
    );
    write_metric(
        output,
        "sensor_subscribers_removed_total",
        "Subscribers removed after a failed delivery",
        MetricType::Counter,
        site,
        summary.subscribers_removed,
    );
}

fn write_upstream_metrics(output: &mut String, site: &str, summary: &MetricsSummary) {
    write_metric(
        output,
        "sensor_upstream_writes_total",
        "Readings written to the durable store",
        MetricType::Counter,
        site,
        summary.upstream_writes,
    );
    write_metric(
        output,
        "sensor_upstream_failures_total",
        "Durable store requests that failed",
        MetricType::Counter,
        site,
        summary.upstream_failures,
    );
    write_metric(
        output,
        "sensor_mirror_dropped_total",
        "Readings dropped because the mirror queue was full",
        MetricType::Counter,
        site,
        summary.mirror_dropped,
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infra::metrics::Metrics;

    #[test]
    fn test_format_prometheus_metrics() {
        let metrics = Metrics::new();
        metrics.record_reading_accepted();
        metrics.record_reading_accepted();
        metrics.record_rejected();
        metrics.record_fanout(3, 1, 0);

        let output = format_prometheus_metrics(&metrics.snapshot(2), "lab");
        assert!(output.contains("sensor_readings_accepted_total{site=\"lab\"} 2"));
        assert!(output.contains("sensor_payloads_rejected_total{site=\"lab\"} 1"));
        assert!(output.contains("sensor_active_subscribers{site=\"lab\"} 2"));
        assert!(output.contains("sensor_fanout_dropped_total{site=\"lab\"} 1"));
        assert!(output.contains("# TYPE sensor_active_subscribers gauge"));
    }
}
