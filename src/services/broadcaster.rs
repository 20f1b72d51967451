//! Fan-out of accepted readings to live viewers
//!
//! Each viewer owns a bounded mpsc receiver; the registry keeps the sending
//! half. `publish` snapshots the registry, releases the lock, then `try_send`s
//! to every subscriber so a slow or dead viewer never blocks the others:
//! - full channel: this event is dropped for that viewer only
//! - closed channel: the viewer is unsubscribed
//!
//! There is no replay. A viewer that subscribes after a publish must query the
//! store for the current state.

use crate::domain::types::{epoch_ms, Reading};
use crate::infra::metrics::Metrics;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum SubscribeError {
    #[error("push delivery is disabled; poll the latest-reading endpoint instead")]
    PushDisabled,
}

/// Registry entry for one live viewer
struct Subscriber {
    tx: mpsc::Sender<Arc<Reading>>,
    subscribed_at: u64,
}

/// Public view of a registry entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubscriberInfo {
    pub id: Uuid,
    pub subscribed_at: u64,
}

/// Receiving side handed to a viewer
pub struct Subscription {
    id: Uuid,
    rx: mpsc::Receiver<Arc<Reading>>,
}

impl Subscription {
    pub fn id(&self) -> Uuid {
        self.id
    }

    /// Next published reading; `None` once the viewer has been unsubscribed
    pub async fn recv(&mut self) -> Option<Arc<Reading>> {
        self.rx.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Arc<Reading>> {
        self.rx.try_recv().ok()
    }
}

/// Outcome of one publish call
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    pub delivered: usize,
    pub dropped: usize,
    pub removed: usize,
}

pub struct Broadcaster {
    subscribers: Mutex<FxHashMap<Uuid, Subscriber>>,
    buffer: usize,
    push_enabled: bool,
    metrics: Arc<Metrics>,
    last_drop_warn: Mutex<Instant>,
}

impl Broadcaster {
    pub fn new(buffer: usize, push_enabled: bool, metrics: Arc<Metrics>) -> Self {
        Self {
            subscribers: Mutex::new(FxHashMap::default()),
            buffer: buffer.max(1),
            push_enabled,
            metrics,
            last_drop_warn: Mutex::new(Instant::now() - Duration::from_secs(2)),
        }
    }

    pub fn is_push_enabled(&self) -> bool {
        self.push_enabled
    }

    pub fn subscribe(&self) -> Result<Subscription, SubscribeError> {
        if !self.push_enabled {
            return Err(SubscribeError::PushDisabled);
        }

        let (tx, rx) = mpsc::channel(self.buffer);
        let id = Uuid::now_v7();
        let count = {
            let mut subscribers = self.subscribers.lock();
            subscribers.insert(id, Subscriber { tx, subscribed_at: epoch_ms() });
            subscribers.len()
        };

        info!(subscriber = %id, subscribers = %count, "subscriber_added");
        Ok(Subscription { id, rx })
    }

    /// Remove a subscriber; returns false if it was already gone
    pub fn unsubscribe(&self, id: Uuid) -> bool {
        let removed = self.subscribers.lock().remove(&id).is_some();
        if removed {
            debug!(subscriber = %id, "subscriber_removed");
        }
        removed
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn subscribers(&self) -> Vec<SubscriberInfo> {
        self.subscribers
            .lock()
            .iter()
            .map(|(id, s)| SubscriberInfo { id: *id, subscribed_at: s.subscribed_at })
            .collect()
    }

    /// Deliver a reading to every current subscriber without blocking
    pub fn publish(&self, reading: &Arc<Reading>) -> PublishReport {
        let mut report = PublishReport::default();
        if !self.push_enabled {
            return report;
        }

        let targets: Vec<(Uuid, mpsc::Sender<Arc<Reading>>)> =
            self.subscribers.lock().iter().map(|(id, s)| (*id, s.tx.clone())).collect();

        for (id, tx) in targets {
            match tx.try_send(reading.clone()) {
                Ok(()) => report.delivered += 1,
                Err(TrySendError::Full(_)) => {
                    report.dropped += 1;
                    self.warn_dropped(id);
                }
                Err(TrySendError::Closed(_)) => {
                    if self.unsubscribe(id) {
                        report.removed += 1;
                    }
                }
            }
        }

        self.metrics.record_fanout(
            report.delivered as u64,
            report.dropped as u64,
            report.removed as u64,
        );
        debug!(
            delivered = %report.delivered,
            dropped = %report.dropped,
            removed = %report.removed,
            "reading_published"
        );
        report
    }

    /// Rate-limited to one warning per second
    fn warn_dropped(&self, id: Uuid) {
        let mut last = self.last_drop_warn.lock();
        if last.elapsed() > Duration::from_secs(1) {
            warn!(subscriber = %id, "fanout_dropped: subscriber channel full");
            *last = Instant::now();
        }
    }
}
