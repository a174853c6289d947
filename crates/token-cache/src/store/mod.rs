//! Keyed byte store backing the distributed token cache.
//!
//! The store treats values as opaque blobs. Absence is not an error, and
//! concurrent `set`s on one key are last-write-wins.

pub mod memory;
pub mod postgres;

pub use memory::InMemoryByteStore;
pub use postgres::{PgByteStore, PgByteStoreOptions};

use crate::errors::TokenCacheError;
use async_trait::async_trait;

/// Keyed blob storage.
#[async_trait]
pub trait ByteStore: Send + Sync {
    /// Fetch the blob stored under `key`, `None` if there is none.
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TokenCacheError>;

    /// Store `value` under `key`, replacing any previous blob.
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), TokenCacheError>;

    /// Delete the blob under `key`. Removing a missing key succeeds.
    async fn remove(&self, key: &str) -> Result<(), TokenCacheError>;
}
