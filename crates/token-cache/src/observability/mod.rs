//! Observability for the token cache library.
//!
//! Metrics are recorded through the `metrics` facade; the embedding binary
//! decides whether a recorder (e.g. the Prometheus exporter) is installed.
//! Without one, every `record_*` call is a no-op.
//!
//! Cache keys, tokens and serialized blobs never appear in labels or logs.

pub mod metrics;
