//! Observability for the refresh daemon.
//!
//! - `health` - liveness/readiness endpoints
//! - `metrics` - refresh cycle metrics

pub mod health;
pub mod metrics;

pub use health::{health_router, HealthState};
