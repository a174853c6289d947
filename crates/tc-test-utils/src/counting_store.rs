//! Byte store wrapper that counts calls and simulates outages.

use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use token_cache::store::{ByteStore, InMemoryByteStore};
use token_cache::TokenCacheError;

/// In-memory store with call counters and a failure switch.
#[derive(Debug, Default)]
pub struct CountingByteStore {
    inner: InMemoryByteStore,
    gets: AtomicUsize,
    sets: AtomicUsize,
    removes: AtomicUsize,
    failing: AtomicBool,
}

impl CountingByteStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every operation fail with `TokenCacheError::Database`.
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn get_count(&self) -> usize {
        self.gets.load(Ordering::SeqCst)
    }

    pub fn set_count(&self) -> usize {
        self.sets.load(Ordering::SeqCst)
    }

    pub fn remove_count(&self) -> usize {
        self.removes.load(Ordering::SeqCst)
    }

    fn check(&self) -> Result<(), TokenCacheError> {
        if self.failing.load(Ordering::SeqCst) {
            return Err(TokenCacheError::Database(
                "Mock byte store unavailable".to_string(),
            ));
        }
        Ok(())
    }
}

#[async_trait]
impl ByteStore for CountingByteStore {
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TokenCacheError> {
        self.gets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.get(key).await
    }

    async fn set(&self, key: &str, value: &[u8]) -> Result<(), TokenCacheError> {
        self.sets.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.set(key, value).await
    }

    async fn remove(&self, key: &str) -> Result<(), TokenCacheError> {
        self.removes.fetch_add(1, Ordering::SeqCst);
        self.check()?;
        self.inner.remove(key).await
    }
}
