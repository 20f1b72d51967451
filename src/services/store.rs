//! Reading store - latest snapshot per source
//!
//! `MemoryStore` is the authoritative local store written by the ingestion gate.
//! `ReadingBackend` abstracts over it and the REST-backed durable store so the
//! query path can be pointed at either by configuration.

use crate::domain::types::{Reading, SourceId};
use async_trait::async_trait;
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("upstream store unavailable: {0}")]
    UpstreamUnavailable(String),
    #[error("upstream store returned malformed data: {0}")]
    Malformed(String),
}

/// Latest-reading storage with get/put semantics
#[async_trait]
pub trait ReadingBackend: Send + Sync {
    /// Short name for logs and the status endpoint
    fn name(&self) -> &'static str;

    /// Latest reading for exactly this source (`None` is the anonymous source)
    async fn get(&self, source: Option<&SourceId>) -> Result<Option<Reading>, StoreError>;

    /// Most recent reading across all sources
    async fn latest(&self) -> Result<Option<Reading>, StoreError>;

    async fn put(&self, reading: &Reading) -> Result<(), StoreError>;
}

#[derive(Default)]
struct StoreInner {
    by_source: FxHashMap<Option<SourceId>, Arc<Reading>>,
    latest: Option<Arc<Reading>>,
}

/// In-memory store holding one `Arc<Reading>` per source
///
/// Writes take the write lock, so concurrent puts are serialized and the last
/// one to complete is visible. Readers clone the `Arc` and never observe a
/// partially replaced reading.
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<StoreInner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, source: Option<&SourceId>) -> Option<Arc<Reading>> {
        self.inner.read().by_source.get(&source.cloned()).cloned()
    }

    pub fn latest(&self) -> Option<Arc<Reading>> {
        self.inner.read().latest.clone()
    }

    /// Replace the entry for the reading's source
    ///
    /// `received_at` is raised to the previous value for that source if the
    /// clock stepped backwards, keeping per-source timestamps non-decreasing.
    pub fn put(&self, reading: Reading) -> Arc<Reading> {
        self.put_with(reading, |_| {})
    }

    /// `put`, running `notify` before the write lock is released
    ///
    /// Notifications for one store are therefore issued in the same order as
    /// the writes they describe. `notify` must not block or touch this store.
    pub fn put_with<F>(&self, mut reading: Reading, notify: F) -> Arc<Reading>
    where
        F: FnOnce(&Arc<Reading>),
    {
        let mut inner = self.inner.write();
        if let Some(previous) = inner.by_source.get(&reading.source_id) {
            reading.received_at = reading.received_at.max(previous.received_at);
        }
        let reading = Arc::new(reading);
        inner.by_source.insert(reading.source_id.clone(), reading.clone());
        inner.latest = Some(reading.clone());
        notify(&reading);
        reading
    }

    pub fn source_count(&self) -> usize {
        self.inner.read().by_source.len()
    }
}

#[async_trait]
impl ReadingBackend for MemoryStore {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn get(&self, source: Option<&SourceId>) -> Result<Option<Reading>, StoreError> {
        Ok(MemoryStore::get(self, source).map(|r| (*r).clone()))
    }

    async fn latest(&self) -> Result<Option<Reading>, StoreError> {
        Ok(MemoryStore::latest(self).map(|r| (*r).clone()))
    }

    async fn put(&self, reading: &Reading) -> Result<(), StoreError> {
        MemoryStore::put(self, reading.clone());
        Ok(())
    }
}

/// Query backend for `store.backend = "rest"`
///
/// Answers with the newer of the local and remote readings, so the gateway's
/// own accepts are visible immediately even before (or without) the mirror
/// reaching the durable store. A remote failure is only surfaced when there is
/// no local reading to fall back to.
pub struct LayeredStore {
    local: Arc<MemoryStore>,
    remote: Arc<dyn ReadingBackend>,
}

impl LayeredStore {
    pub fn new(local: Arc<MemoryStore>, remote: Arc<dyn ReadingBackend>) -> Self {
        Self { local, remote }
    }

    fn newer(
        &self,
        local: Option<Arc<Reading>>,
        remote: Result<Option<Reading>, StoreError>,
    ) -> Result<Option<Reading>, StoreError> {
        let local = local.map(|r| (*r).clone());
        match remote {
            Ok(remote) => Ok(match (local, remote) {
                (Some(l), Some(r)) => Some(if r.received_at > l.received_at { r } else { l }),
                (l, r) => l.or(r),
            }),
            Err(e) => match local {
                Some(l) => {
                    warn!(backend = %self.remote.name(), error = %e, "query_remote_failed_serving_local");
                    Ok(Some(l))
                }
                None => Err(e),
            },
        }
    }
}

#[async_trait]
impl ReadingBackend for LayeredStore {
    fn name(&self) -> &'static str {
        self.remote.name()
    }

    async fn get(&self, source: Option<&SourceId>) -> Result<Option<Reading>, StoreError> {
        let remote = self.remote.get(source).await;
        self.newer(self.local.get(source), remote)
    }

    async fn latest(&self) -> Result<Option<Reading>, StoreError> {
        let remote = self.remote.latest().await;
        self.newer(self.local.latest(), remote)
    }

    async fn put(&self, reading: &Reading) -> Result<(), StoreError> {
        self.local.put(reading.clone());
        self.remote.put(reading).await
    }
}
