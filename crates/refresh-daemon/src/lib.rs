//! Token Refresh Daemon Library
//!
//! Keeps users' distributed token caches warm: on a fixed schedule, every
//! account recorded by the web front ends is refreshed silently through its
//! stored cache, so access tokens stay available without the user present.
//!
//! # Modules
//!
//! - `config` - Daemon configuration from environment
//! - `errors` - Refresh cycle errors
//! - `observability` - Health endpoints and metrics
//! - `runner` - One refresh pass over all tracked accounts
//! - `tasks` - Refresh loop and cache maintenance background tasks

pub mod config;
pub mod errors;
pub mod observability;
pub mod runner;
pub mod tasks;
