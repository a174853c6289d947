//! Identity client boundary.
//!
//! The OAuth library is an external collaborator. This module describes the
//! surface the cache provider and the refresh runner need from it:
//!
//! ```text
//! ConfidentialClientFactory ──build──► ConfidentialClient
//!                                         │ user_token_cache()
//!                                         ▼
//!                                      TokenCache ──hooks──► TokenCacheHooks
//!                                                              (cache provider)
//! ```
//!
//! The client fires `before_access` before reading its in-memory cache,
//! `before_write` before mutating it, and `after_access` once the operation is
//! over (with `has_state_changed` set when the cache was modified).

pub mod http_client;
pub mod token_cache;

pub use http_client::{HttpClientFactory, HttpClientOptions, HttpConfidentialClient};
pub use token_cache::InMemoryTokenCache;

use crate::errors::TokenCacheError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::secret::SecretString;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Home account reference: enough to find an account's cache entries
/// without an interactive sign-in.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HomeAccountId {
    /// Full identifier, conventionally `{object_id}.{tenant_id}`.
    pub identifier: String,
    pub object_id: String,
    pub tenant_id: String,
}

impl HomeAccountId {
    #[must_use]
    pub fn new(identifier: String, object_id: String, tenant_id: String) -> Self {
        Self {
            identifier,
            object_id,
            tenant_id,
        }
    }
}

/// An account known to the identity client.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub home_account_id: HomeAccountId,
    /// Identity provider instance (cloud) the account belongs to.
    pub environment: String,
    /// Display/login name. Not used for security decisions.
    pub username: String,
}

/// Result of a successful token acquisition.
#[derive(Debug, Clone)]
pub struct AuthenticationResult {
    pub access_token: SecretString,
    pub expires_on: DateTime<Utc>,
    pub scopes: Vec<String>,
    pub account: Account,
}

/// Arguments passed to every cache notification.
pub struct TokenCacheNotification<'a> {
    /// The cache being accessed. Hooks load into and serialize from it.
    pub token_cache: &'a dyn TokenCache,
    /// True when the operation modified the in-memory cache.
    pub has_state_changed: bool,
}

/// Serialization lifecycle hooks registered on a [`TokenCache`].
#[async_trait]
pub trait TokenCacheHooks: Send + Sync {
    /// Fired before the client reads its in-memory cache.
    async fn before_access(&self, args: &TokenCacheNotification<'_>)
        -> Result<(), TokenCacheError>;

    /// Fired after any read or write attempt.
    async fn after_access(&self, args: &TokenCacheNotification<'_>)
        -> Result<(), TokenCacheError>;

    /// Fired before the client stages a write. Default: no-op.
    async fn before_write(
        &self,
        _args: &TokenCacheNotification<'_>,
    ) -> Result<(), TokenCacheError> {
        Ok(())
    }
}

/// The identity client's in-memory token cache.
pub trait TokenCache: Send + Sync {
    /// Register the serialization hooks, replacing any previously registered set.
    fn set_hooks(&self, hooks: Arc<dyn TokenCacheHooks>);

    /// Serialize the full in-memory cache.
    ///
    /// # Errors
    ///
    /// Returns `TokenCacheError::Serialization` if the state cannot be encoded.
    fn serialize(&self) -> Result<Vec<u8>, TokenCacheError>;

    /// Load a serialized blob. `None` means no blob exists for this key.
    ///
    /// With `clear_existing` the in-memory content is replaced, not merged.
    ///
    /// # Errors
    ///
    /// Returns `TokenCacheError::Serialization` if the blob cannot be decoded.
    fn deserialize(&self, bytes: Option<&[u8]>, clear_existing: bool)
        -> Result<(), TokenCacheError>;
}

/// A confidential-client application instance.
///
/// One instance serves one cache key: its cache provider fully replaces the
/// in-memory cache on every access.
#[async_trait]
pub trait ConfidentialClient: Send + Sync {
    /// The per-user token cache the provider binds to.
    fn user_token_cache(&self) -> &dyn TokenCache;

    /// Accounts present in the (freshly loaded) cache.
    async fn get_accounts(&self) -> Result<Vec<Account>, TokenCacheError>;

    /// Acquire an access token without user interaction.
    ///
    /// Fails with `TokenCacheError::InteractionRequired` when the cached
    /// state cannot produce a token on its own.
    async fn acquire_token_silent(
        &self,
        scopes: &[String],
        account: &Account,
    ) -> Result<AuthenticationResult, TokenCacheError>;
}

/// Builds fresh confidential-client instances with empty caches.
pub trait ConfidentialClientFactory: Send + Sync {
    /// # Errors
    ///
    /// Returns `TokenCacheError::Configuration` if the client cannot be built.
    fn build(&self) -> Result<Box<dyn ConfidentialClient>, TokenCacheError>;
}
