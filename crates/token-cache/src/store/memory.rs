//! Process-local byte store.

use super::ByteStore;
use crate::errors::TokenCacheError;
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// `HashMap`-backed store with no expiration.
///
/// Useful for single-process deployments and tests; nothing survives a restart.
#[derive(Debug, Default)]
pub struct InMemoryByteStore {
    entries: RwLock<HashMap<String, Vec<u8>>>,
}

impl InMemoryByteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys.
    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }

    pub async fn contains_key(&self, key: &str) -> bool {
        self.entries.read().await.contains_key(key)
    }
}

#[async_trait]
impl ByteStore for InMemoryByteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TokenCacheError> {
        Ok(self.entries.read().await.get(key).cloned())
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), TokenCacheError> {
        self.entries
            .write()
            .await
            .insert(key.to_string(), value.to_vec());
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<(), TokenCacheError> {
        self.entries.write().await.remove(key);
        Ok(())
    }
}
