//! Domain models - readings and fleet nodes
//!
//! - `types` - `Reading`, `Measurements`, `SourceId` and the wire payloads
//! - `node` - `SensorNode` and map `Position`

pub mod node;
pub mod types;

pub use node::{NodeStatus, Position, SensorNode};
pub use types::{epoch_ms, Measurements, QueryResponse, Reading, ReadingPayload, SourceId};
