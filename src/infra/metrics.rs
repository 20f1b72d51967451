//! Lock-free metrics collection and periodic reporting
//!
//! Counters are updated from the ingest and fan-out hot paths without locking.
//! All atomics use Relaxed ordering: these are statistics only and must not be
//! used for coordination.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Instant;
use tracing::info;

/// Lock-free metrics collector
pub struct Metrics {
    /// Readings accepted into the store (monotonic)
    readings_accepted: AtomicU64,
    /// Readings accepted since last report (reset on report)
    readings_since_report: AtomicU64,
    /// Heartbeat-only payloads (monotonic)
    heartbeats: AtomicU64,
    /// Payloads rejected as invalid (monotonic)
    rejected: AtomicU64,
    /// Events handed to a subscriber channel (monotonic)
    fanout_delivered: AtomicU64,
    /// Events dropped because a subscriber channel was full (monotonic)
    fanout_dropped: AtomicU64,
    /// Subscribers removed after a failed write (monotonic)
    subscribers_removed: AtomicU64,
    /// Readings written to the upstream store (monotonic)
    upstream_writes: AtomicU64,
    /// Upstream writes or reads that failed (monotonic)
    upstream_failures: AtomicU64,
    /// Readings dropped because the mirror queue was full (monotonic)
    mirror_dropped: AtomicU64,
    /// Latest-reading queries served (monotonic)
    queries: AtomicU64,
    /// MQTT messages received by the ingest adapter (monotonic)
    mqtt_messages: AtomicU64,
    last_report_time: parking_lot::Mutex<Instant>,
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

impl Metrics {
    pub fn new() -> Self {
        Self {
            readings_accepted: AtomicU64::new(0),
            readings_since_report: AtomicU64::new(0),
            heartbeats: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            fanout_delivered: AtomicU64::new(0),
            fanout_dropped: AtomicU64::new(0),
            subscribers_removed: AtomicU64::new(0),
            upstream_writes: AtomicU64::new(0),
            upstream_failures: AtomicU64::new(0),
            mirror_dropped: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            mqtt_messages: AtomicU64::new(0),
            last_report_time: parking_lot::Mutex::new(Instant::now()),
        }
    }

    #[inline]
    pub fn record_reading_accepted(&self) {
        self.readings_accepted.fetch_add(1, Ordering::Relaxed);
        self.readings_since_report.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_heartbeat(&self) {
        self.heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_rejected(&self) {
        self.rejected.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_fanout(&self, delivered: u64, dropped: u64, removed: u64) {
        self.fanout_delivered.fetch_add(delivered, Ordering::Relaxed);
        self.fanout_dropped.fetch_add(dropped, Ordering::Relaxed);
        self.subscribers_removed.fetch_add(removed, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_upstream_write(&self) {
        self.upstream_writes.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_upstream_failure(&self) {
        self.upstream_failures.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_mirror_dropped(&self) {
        self.mirror_dropped.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_query(&self) {
        self.queries.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn record_mqtt_message(&self) {
        self.mqtt_messages.fetch_add(1, Ordering::Relaxed);
    }

    /// Snapshot all counters and reset the per-interval ones
    pub fn report(&self, active_subscribers: usize) -> MetricsSummary {
        let since_report = self.readings_since_report.swap(0, Ordering::Relaxed);

        let elapsed_secs = {
            let mut last = self.last_report_time.lock();
            let elapsed = last.elapsed().as_secs_f64();
            *last = Instant::now();
            elapsed
        };
        let readings_per_sec =
            if elapsed_secs > 0.0 { since_report as f64 / elapsed_secs } else { 0.0 };

        MetricsSummary {
            readings_accepted: self.readings_accepted.load(Ordering::Relaxed),
            readings_per_sec,
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            fanout_delivered: self.fanout_delivered.load(Ordering::Relaxed),
            fanout_dropped: self.fanout_dropped.load(Ordering::Relaxed),
            subscribers_removed: self.subscribers_removed.load(Ordering::Relaxed),
            active_subscribers,
            upstream_writes: self.upstream_writes.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            mirror_dropped: self.mirror_dropped.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            mqtt_messages: self.mqtt_messages.load(Ordering::Relaxed),
        }
    }

    /// Snapshot without resetting the interval counter (used by /metrics scrapes)
    pub fn snapshot(&self, active_subscribers: usize) -> MetricsSummary {
        MetricsSummary {
            readings_accepted: self.readings_accepted.load(Ordering::Relaxed),
            readings_per_sec: 0.0,
            heartbeats: self.heartbeats.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            fanout_delivered: self.fanout_delivered.load(Ordering::Relaxed),
            fanout_dropped: self.fanout_dropped.load(Ordering::Relaxed),
            subscribers_removed: self.subscribers_removed.load(Ordering::Relaxed),
            active_subscribers,
            upstream_writes: self.upstream_writes.load(Ordering::Relaxed),
            upstream_failures: self.upstream_failures.load(Ordering::Relaxed),
            mirror_dropped: self.mirror_dropped.load(Ordering::Relaxed),
            queries: self.queries.load(Ordering::Relaxed),
            mqtt_messages: self.mqtt_messages.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the counters
#[derive(Debug, Clone, Default)]
pub struct MetricsSummary {
    pub readings_accepted: u64,
    pub readings_per_sec: f64,
    pub heartbeats: u64,
    pub rejected: u64,
    pub fanout_delivered: u64,
    pub fanout_dropped: u64,
    pub subscribers_removed: u64,
    pub active_subscribers: usize,
    pub upstream_writes: u64,
    pub upstream_failures: u64,
    pub mirror_dropped: u64,
    pub queries: u64,
    pub mqtt_messages: u64,
}

impl MetricsSummary {
    pub fn log(&self) {
        info!(
            readings = %self.readings_accepted,
            readings_per_sec = %format!("{:.2}", self.readings_per_sec),
            heartbeats = %self.heartbeats,
            rejected = %self.rejected,
            subscribers = %self.active_subscribers,
            fanout_delivered = %self.fanout_delivered,
            fanout_dropped = %self.fanout_dropped,
            subscribers_removed = %self.subscribers_removed,
            upstream_writes = %self.upstream_writes,
            upstream_failures = %self.upstream_failures,
            mirror_dropped = %self.mirror_dropped,
            queries = %self.queries,
            "metrics_report"
        );
    }
}
