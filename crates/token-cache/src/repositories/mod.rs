//! Repository layer for the token cache.
//!
//! All queries use parameterized raw SQL through sqlx.

pub mod account_activities;

pub use account_activities::{AccountActivityRepository, AccountActivityRepositoryTrait};
