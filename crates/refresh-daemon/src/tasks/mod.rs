//! Background tasks for the refresh daemon.
//!
//! # Tasks
//!
//! - `refresh_loop` - Runs refresh cycles on a schedule
//! - `cache_maintenance` - Deletes expired token cache entries

pub mod cache_maintenance;
pub mod refresh_loop;

pub use cache_maintenance::start_cache_maintenance;
pub use refresh_loop::{start_refresh_loop, RefreshLoopConfig};
