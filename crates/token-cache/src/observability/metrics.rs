//! Metrics definitions for the token cache.
//!
//! All metrics follow Prometheus naming conventions:
//! - `tc_` prefix
//! - `_total` suffix for counters
//! - `_seconds` suffix for duration histograms
//!
//! # Cardinality
//!
//! Labels are bounded:
//! - `status`: hit, miss, success, error
//! - `operation`: bounded by code (select, upsert, update, delete)
//! - `table`: `token_cache`, `account_activities`

use metrics::{counter, histogram};
use std::time::Duration;

// ============================================================================
// Cache Provider Metrics
// ============================================================================

/// Record a provider load from the byte store.
///
/// Metric: `tc_cache_reads_total`
/// Labels: `status` (hit, miss, error)
pub fn record_cache_read(status: &str) {
    counter!("tc_cache_reads_total", "status" => status.to_string()).increment(1);
}

/// Record a provider write-back to the byte store.
///
/// Metric: `tc_cache_writes_total`
/// Labels: `status` (success, error)
pub fn record_cache_write(status: &str) {
    counter!("tc_cache_writes_total", "status" => status.to_string()).increment(1);
}

/// Record an explicit cache clear.
///
/// Metric: `tc_cache_clears_total`
pub fn record_cache_clear() {
    counter!("tc_cache_clears_total").increment(1);
}

// ============================================================================
// Database Metrics
// ============================================================================

/// Record database query execution
///
/// Metric: `tc_db_query_duration_seconds`, `tc_db_queries_total`
/// Labels: `operation`, `table`, `status`
pub fn record_db_query(operation: &str, table: &str, status: &str, duration: Duration) {
    histogram!("tc_db_query_duration_seconds", "operation" => operation.to_string(), "table" => table.to_string())
        .record(duration.as_secs_f64());

    counter!("tc_db_queries_total", "operation" => operation.to_string(), "table" => table.to_string(), "status" => status.to_string())
        .increment(1);
}

/// Map a query result to the `status` label.
pub(crate) fn status_label<T, E>(result: &Result<T, E>) -> &'static str {
    if result.is_ok() {
        "success"
    } else {
        "error"
    }
}
