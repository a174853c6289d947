//! Common utilities shared across the token cache workspace.

#![warn(clippy::pedantic)]

/// Module for secret types that prevent accidental logging
pub mod secret;

/// Module for database pool configuration and connection
pub mod database;
