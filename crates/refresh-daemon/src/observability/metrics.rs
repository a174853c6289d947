//! Metrics definitions for the refresh daemon.
//!
//! Shares the `tc_` prefix with the token cache library metrics.
//!
//! # Cardinality
//!
//! - `outcome`: refreshed, interaction_required, failed
//! - `status`: success, error

use metrics::{counter, gauge, histogram};
use std::time::Duration;

/// Record one account's silent refresh attempt.
///
/// Metric: `tc_refresh_attempts_total`
/// Labels: `outcome`
pub fn record_refresh_attempt(outcome: &str) {
    counter!("tc_refresh_attempts_total", "outcome" => outcome.to_string()).increment(1);
}

/// Record a completed or aborted refresh cycle.
///
/// Metric: `tc_refresh_cycle_duration_seconds`, `tc_refresh_cycle_accounts`
/// Labels: `status`
#[allow(clippy::cast_precision_loss)]
pub fn record_refresh_cycle(status: &str, duration: Duration, accounts: usize) {
    histogram!("tc_refresh_cycle_duration_seconds", "status" => status.to_string())
        .record(duration.as_secs_f64());

    gauge!("tc_refresh_cycle_accounts").set(accounts as f64);
}

/// Record an expired-entry sweep.
///
/// Metric: `tc_cache_expired_deleted_total`
pub fn record_expired_deleted(count: u64) {
    counter!("tc_cache_expired_deleted_total").increment(count);
}
