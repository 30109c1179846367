//! Observability surface: health probes for orchestration and relay-wide
//! counters.

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
pub use metrics::RelayMetrics;
