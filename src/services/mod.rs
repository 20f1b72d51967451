//! Services - core state and business logic
//!
//! - `ingest` - Ingestion gate: payload validation and acceptance
//! - `store` - Latest reading per source, the backend abstraction and the layered query backend
//! - `broadcaster` - Fan-out of accepted readings to live viewers
//! - `reconciler` - Dashboard-side sample buffer and display state
//! - `layout` - Fleet map positions and relative distances
//! - `simulator` - Demo fleet and station random walk

pub mod broadcaster;
pub mod ingest;
pub mod layout;
pub mod reconciler;
pub mod simulator;
pub mod store;

pub use broadcaster::{Broadcaster, PublishReport, SubscribeError, Subscription};
pub use ingest::{IngestError, IngestOutcome, IngestionGate};
pub use layout::{FleetLayout, LayoutEngine, LayoutError, LayoutParams};
pub use reconciler::{Reconciler, SampleBuffer, TickOutcome};
pub use store::{LayeredStore, MemoryStore, ReadingBackend, StoreError};
