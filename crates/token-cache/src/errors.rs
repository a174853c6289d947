//! Token cache error types.
//!
//! One error type covers the byte store, the activity repository and the
//! identity-client boundary so callers can classify failures with a single
//! `match`. Store and repository failures carry the driver message; they are
//! logged server-side and never include connection strings or token values.

use thiserror::Error;

/// Token cache error type.
///
/// Classification used by the refresh runner:
/// - Database: store or repository unavailable (retryable)
/// - InteractionRequired: silent acquisition impossible, user must sign in again
/// - Identity: any other identity-client failure (per-account, not retryable)
/// - Serialization, Configuration, Internal: local faults
#[derive(Debug, Error, Clone)]
pub enum TokenCacheError {
    #[error("Database error: {0}")]
    Database(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Interaction required: {0}")]
    InteractionRequired(String),

    #[error("Identity client error: {0}")]
    Identity(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl TokenCacheError {
    /// Whether retrying the same operation later may succeed without any
    /// change on the caller's side.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, TokenCacheError::Database(_))
    }

    /// Whether the user has to go through an interactive sign-in.
    #[must_use]
    pub fn is_interaction_required(&self) -> bool {
        matches!(self, TokenCacheError::InteractionRequired(_))
    }

    /// Bounded label for metrics.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            TokenCacheError::Database(_) => "database",
            TokenCacheError::Serialization(_) => "serialization",
            TokenCacheError::InteractionRequired(_) => "interaction_required",
            TokenCacheError::Identity(_) => "identity",
            TokenCacheError::Configuration(_) => "configuration",
            TokenCacheError::Internal(_) => "internal",
        }
    }
}

impl From<sqlx::Error> for TokenCacheError {
    fn from(err: sqlx::Error) -> Self {
        TokenCacheError::Database(err.to_string())
    }
}

impl From<serde_json::Error> for TokenCacheError {
    fn from(err: serde_json::Error) -> Self {
        TokenCacheError::Serialization(err.to_string())
    }
}
