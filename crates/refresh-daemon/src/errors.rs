//! Refresh daemon error types.

use thiserror::Error;
use token_cache::TokenCacheError;

/// A refresh cycle that could not complete.
///
/// Per-account failures never surface here; they are counted in the cycle's
/// summary instead.
#[derive(Debug, Error)]
pub enum RefreshError {
    /// Candidate accounts could not be loaded.
    #[error("Failed to load accounts to refresh: {0}")]
    Repository(#[from] TokenCacheError),

    /// Too many consecutive store failures; the store is likely down.
    #[error("Aborted after {consecutive_failures} consecutive store failures: {last_error}")]
    SystemicFailure {
        consecutive_failures: u32,
        last_error: TokenCacheError,
    },
}
