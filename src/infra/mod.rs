//! Infrastructure - configuration and metrics
//!
//! - `config` - Application configuration (TOML loading, defaults, env overrides)
//! - `metrics` - Lock-free counters and periodic reporting

pub mod config;
pub mod metrics;

pub use config::{Config, DashboardMode, StoreBackend};
pub use metrics::{Metrics, MetricsSummary};
