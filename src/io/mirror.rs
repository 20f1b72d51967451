//! Write-through mirror to the durable store, off the ingest hot path
//!
//! The ingestion gate enqueues accepted readings with `try_send`; a worker
//! drains the queue and writes each one to the upstream backend. Failures are
//! logged and counted, never reported back to the sensor.

use crate::domain::types::Reading;
use crate::infra::metrics::Metrics;
use crate::services::store::ReadingBackend;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::sync::watch;
use tracing::{debug, info, warn};

/// Sender handle for mirrored readings
///
/// Non-blocking - if the queue is full the reading is dropped and counted.
#[derive(Clone)]
pub struct MirrorSender {
    tx: mpsc::Sender<Arc<Reading>>,
    metrics: Arc<Metrics>,
}

impl MirrorSender {
    pub fn send(&self, reading: Arc<Reading>) {
        match self.tx.try_send(reading) {
            Ok(()) => {}
            Err(TrySendError::Full(_)) => {
                self.metrics.record_mirror_dropped();
                debug!("mirror_dropped: queue full");
            }
            Err(TrySendError::Closed(_)) => {
                self.metrics.record_mirror_dropped();
                debug!("mirror_dropped: worker stopped");
            }
        }
    }
}

/// Worker that writes queued readings to the upstream backend
pub struct MirrorWorker {
    backend: Arc<dyn ReadingBackend>,
    rx: mpsc::Receiver<Arc<Reading>>,
    metrics: Arc<Metrics>,
}

impl MirrorWorker {
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!(backend = %self.backend.name(), "mirror_worker_started");
        let mut last_fail_warn = Instant::now() - Duration::from_secs(2);

        loop {
            tokio::select! {
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        info!("mirror_worker_shutdown");
                        return;
                    }
                }
                msg = self.rx.recv() => {
                    let Some(reading) = msg else {
                        info!("mirror_worker_stopped");
                        return;
                    };
                    match self.backend.put(&reading).await {
                        Ok(()) => {
                            self.metrics.record_upstream_write();
                            debug!(source = ?reading.source_id, "mirror_write_ok");
                        }
                        Err(e) => {
                            self.metrics.record_upstream_failure();
                            if last_fail_warn.elapsed() > Duration::from_secs(1) {
                                warn!(error = %e, "upstream_write_failed");
                                last_fail_warn = Instant::now();
                            }
                        }
                    }
                }
            }
        }
    }
}

/// Create a mirror queue and its worker
///
/// Returns the sender (for the ingestion gate) and the worker (to be spawned)
pub fn create_mirror(
    backend: Arc<dyn ReadingBackend>,
    metrics: Arc<Metrics>,
    buffer_size: usize,
) -> (MirrorSender, MirrorWorker) {
    let (tx, rx) = mpsc::channel(buffer_size.max(1));
    let sender = MirrorSender { tx, metrics: metrics.clone() };
    let worker = MirrorWorker { backend, rx, metrics };
    (sender, worker)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::{epoch_ms, Measurements, SourceId};
    use crate::services::store::{MemoryStore, StoreError};
    use async_trait::async_trait;

    struct FailingBackend;

    #[async_trait]
    impl ReadingBackend for FailingBackend {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn get(&self, _: Option<&SourceId>) -> Result<Option<Reading>, StoreError> {
            Err(StoreError::UpstreamUnavailable("down".to_string()))
        }

        async fn latest(&self) -> Result<Option<Reading>, StoreError> {
            Err(StoreError::UpstreamUnavailable("down".to_string()))
        }

        async fn put(&self, _: &Reading) -> Result<(), StoreError> {
            Err(StoreError::UpstreamUnavailable("down".to_string()))
        }
    }

    fn reading() -> Arc<Reading> {
        Arc::new(Reading::new(None, Measurements::new(20.0, 500.0, 40.0), epoch_ms()))
    }

    #[tokio::test]
    async fn test_worker_writes_to_backend() {
        let store = Arc::new(MemoryStore::new());
        let metrics = Arc::new(Metrics::new());
        let (sender, worker) = create_mirror(store.clone(), metrics.clone(), 8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        sender.send(reading());
        drop(sender);
        worker.run(shutdown_rx).await;

        assert_eq!(store.latest().unwrap().measurements.co2, 500.0);
        assert_eq!(metrics.snapshot(0).upstream_writes, 1);
    }

    #[tokio::test]
    async fn test_failures_are_counted_not_propagated() {
        let metrics = Arc::new(Metrics::new());
        let (sender, worker) = create_mirror(Arc::new(FailingBackend), metrics.clone(), 8);
        let (_shutdown_tx, shutdown_rx) = watch::channel(false);

        sender.send(reading());
        sender.send(reading());
        drop(sender);
        worker.run(shutdown_rx).await;

        assert_eq!(metrics.snapshot(0).upstream_failures, 2);
    }

    #[test]
    fn test_full_queue_drops() {
        let metrics = Arc::new(Metrics::new());
        let (sender, _worker) = create_mirror(Arc::new(MemoryStore::new()), metrics.clone(), 1);

        sender.send(reading());
        sender.send(reading());

        assert_eq!(metrics.snapshot(0).mirror_dropped, 1);
    }
}
