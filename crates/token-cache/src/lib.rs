//! Distributed Token Cache Library
//!
//! Persists an OAuth confidential client's per-user token cache in a shared
//! store so that web front ends and a background refresh daemon can all
//! acquire tokens silently for the same user:
//!
//! - Keyed token cache provider (load before access, write back on change)
//! - Postgres and in-memory byte stores
//! - Account activity tracking for scheduled refresh
//! - A thin refresh-token grant client for the identity boundary
//!
//! # Architecture
//!
//! ```text
//! ConfidentialClient ──hooks──► DistributedTokenCacheProvider ──► ByteStore
//!        │                                                       (token_cache)
//!        └── services::record_account_activity ──► AccountActivityRepository
//!                                                  (account_activities)
//! ```
//!
//! # Modules
//!
//! - `cache_key` - Cache partition key
//! - `errors` - Error type and retry classification
//! - `identity` - Identity client traits, in-memory token cache, HTTP adapter
//! - `models` - Account activity record
//! - `observability` - Metrics
//! - `provider` - Token cache provider, factory and per-key locks
//! - `repositories` - Account activity persistence
//! - `services` - Web-path activity recording
//! - `store` - Byte store trait and implementations

pub mod cache_key;
pub mod errors;
pub mod identity;
pub mod models;
pub mod observability;
pub mod provider;
pub mod repositories;
pub mod services;
pub mod store;

pub use cache_key::CacheKey;
pub use errors::TokenCacheError;
