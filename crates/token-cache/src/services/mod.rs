//! Services layer for the token cache.
//!
//! Business logic that combines the identity client, the cache provider and
//! the repositories.

pub mod activity_recorder;

pub use activity_recorder::record_account_activity;
