//! Distributed token cache provider.
//!
//! Binds an identity client's in-memory cache to one cache key in a
//! [`ByteStore`]:
//!
//! - `before_access`: load the stored blob and replace the in-memory cache
//!   with it (an absent blob empties the cache)
//! - `after_access`: write the cache back, once, if the client changed it
//! - empty cache key: pass-through, no store I/O at all
//!
//! Providers created through a [`TokenCacheProviderFactory`] also hold a
//! per-key lock from `before_access` until `after_access`, so two providers
//! bound to the same key in one process cannot interleave their
//! load→mutate→store windows. Across processes the store stays
//! last-write-wins.

pub mod key_locks;

pub use key_locks::{KeyLockGuard, KeyLocks};

use crate::cache_key::CacheKey;
use crate::errors::TokenCacheError;
use crate::identity::{TokenCache, TokenCacheHooks, TokenCacheNotification};
use crate::observability::metrics::{record_cache_clear, record_cache_read, record_cache_write};
use crate::store::ByteStore;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, instrument, trace, warn};

/// Cache provider bound to exactly one cache key.
pub struct DistributedTokenCacheProvider {
    cache_key: CacheKey,
    store: Arc<dyn ByteStore>,
    locks: Option<KeyLocks>,
    held: Mutex<Option<KeyLockGuard>>,
}

impl DistributedTokenCacheProvider {
    /// Create a provider without cross-provider locking.
    ///
    /// Prefer [`TokenCacheProviderFactory::new_provider`] when several
    /// providers may share a key.
    #[must_use]
    pub fn new(cache_key: CacheKey, store: Arc<dyn ByteStore>) -> Self {
        Self {
            cache_key,
            store,
            locks: None,
            held: Mutex::new(None),
        }
    }

    fn with_locks(cache_key: CacheKey, store: Arc<dyn ByteStore>, locks: KeyLocks) -> Self {
        Self {
            cache_key,
            store,
            locks: Some(locks),
            held: Mutex::new(None),
        }
    }

    #[must_use]
    pub fn cache_key(&self) -> &CacheKey {
        &self.cache_key
    }

    /// Register this provider's hooks on `token_cache`. No I/O.
    pub fn initialize(self: &Arc<Self>, token_cache: &dyn TokenCache) {
        token_cache.set_hooks(Arc::clone(self) as Arc<dyn TokenCacheHooks>);
    }

    /// Delete the stored blob for the bound key.
    ///
    /// Only the byte-store entry is removed; activity bookkeeping is untouched.
    ///
    /// # Errors
    ///
    /// Returns `TokenCacheError::Database` if the store delete fails.
    #[instrument(skip_all)]
    pub async fn clear(&self) -> Result<(), TokenCacheError> {
        if self.cache_key.is_empty() {
            trace!(target: "tc.provider", "Empty cache key, nothing to clear");
            return Ok(());
        }

        // Inside an access window this provider already holds the key.
        let held = self.held.lock().await;
        let _temporary = match (&self.locks, held.is_none()) {
            (Some(locks), true) => Some(locks.acquire(self.cache_key.as_str()).await),
            _ => None,
        };

        self.store.remove(self.cache_key.as_str()).await?;
        record_cache_clear();
        debug!(target: "tc.provider", cache_key = ?self.cache_key, "Cleared token cache entry");
        Ok(())
    }

    async fn acquire_key_lock(&self) {
        let Some(locks) = &self.locks else {
            return;
        };
        let mut held = self.held.lock().await;
        if held.is_none() {
            *held = Some(locks.acquire(self.cache_key.as_str()).await);
        }
    }

    async fn release_key_lock(&self) {
        self.held.lock().await.take();
    }

    async fn load(&self, token_cache: &dyn TokenCache) -> Result<(), TokenCacheError> {
        let blob = match self.store.get(self.cache_key.as_str()).await {
            Ok(blob) => blob,
            Err(e) => {
                record_cache_read("error");
                warn!(target: "tc.provider", error = %e, "Failed to load token cache");
                return Err(e);
            }
        };

        record_cache_read(if blob.is_some() { "hit" } else { "miss" });
        token_cache.deserialize(blob.as_deref(), true)
    }

    async fn store_back(&self, token_cache: &dyn TokenCache) -> Result<(), TokenCacheError> {
        let bytes = token_cache.serialize()?;
        match self.store.set(self.cache_key.as_str(), &bytes).await {
            Ok(()) => {
                record_cache_write("success");
                debug!(target: "tc.provider", bytes = bytes.len(), "Persisted token cache");
                Ok(())
            }
            Err(e) => {
                record_cache_write("error");
                warn!(target: "tc.provider", error = %e, "Failed to persist token cache");
                Err(e)
            }
        }
    }
}

#[async_trait]
impl TokenCacheHooks for DistributedTokenCacheProvider {
    async fn before_access(&self, args: &TokenCacheNotification<'_>) -> Result<(), TokenCacheError> {
        if self.cache_key.is_empty() {
            return Ok(());
        }

        self.acquire_key_lock().await;

        let result = self.load(args.token_cache).await;
        if result.is_err() {
            // No after_access is guaranteed once loading failed.
            self.release_key_lock().await;
        }
        result
    }

    async fn after_access(&self, args: &TokenCacheNotification<'_>) -> Result<(), TokenCacheError> {
        let result = if args.has_state_changed && !self.cache_key.is_empty() {
            self.store_back(args.token_cache).await
        } else {
            Ok(())
        };

        self.release_key_lock().await;
        result
    }
}

/// Creates providers that share one store and one per-key lock registry.
#[derive(Clone)]
pub struct TokenCacheProviderFactory {
    store: Arc<dyn ByteStore>,
    locks: KeyLocks,
}

impl TokenCacheProviderFactory {
    #[must_use]
    pub fn new(store: Arc<dyn ByteStore>) -> Self {
        Self {
            store,
            locks: KeyLocks::new(),
        }
    }

    /// A fresh provider bound to `cache_key`.
    #[must_use]
    pub fn new_provider(&self, cache_key: CacheKey) -> Arc<DistributedTokenCacheProvider> {
        Arc::new(DistributedTokenCacheProvider::with_locks(
            cache_key,
            Arc::clone(&self.store),
            self.locks.clone(),
        ))
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn ByteStore> {
        &self.store
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::identity::token_cache::{CachedAccessToken, CachedRefreshToken};
    use crate::identity::{Account, HomeAccountId, InMemoryTokenCache};
    use crate::store::InMemoryByteStore;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use std::time::Duration;

    /// Wraps an in-memory store and counts calls.
    #[derive(Default)]
    struct CountingStore {
        inner: InMemoryByteStore,
        gets: AtomicUsize,
        sets: AtomicUsize,
        fail: AtomicBool,
    }

    #[async_trait]
    impl ByteStore for CountingStore {
        async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TokenCacheError> {
            self.gets.fetch_add(1, Ordering::SeqCst);
            if self.fail.load(Ordering::SeqCst) {
                return Err(TokenCacheError::Database("store unavailable".into()));
            }
            self.inner.get(key).await
        }

        async fn set(&self, key: &str, value: &[u8]) -> Result<(), TokenCacheError> {
            self.sets.fetch_add(1, Ordering::SeqCst);
            self.inner.set(key, value).await
        }

        async fn remove(&self, key: &str) -> Result<(), TokenCacheError> {
            self.inner.remove(key).await
        }
    }

    fn account(id: &str) -> Account {
        Account {
            home_account_id: HomeAccountId::new(
                format!("{id}.tenant"),
                id.to_string(),
                "tenant".to_string(),
            ),
            environment: "login.example.com".to_string(),
            username: format!("{id}@example.com"),
        }
    }

    fn add_tokens(cache: &InMemoryTokenCache, id: &str) {
        let account = account(id);
        let home = account.home_account_id.identifier.clone();
        cache
            .save_tokens(
                &account,
                CachedAccessToken {
                    home_account_id: home.clone(),
                    scopes: vec!["User.Read".to_string()],
                    secret: format!("at-{id}"),
                    expires_on: Utc::now() + ChronoDuration::hours(1),
                },
                Some(CachedRefreshToken {
                    home_account_id: home,
                    client_id: "client".to_string(),
                    secret: format!("rt-{id}"),
                }),
            )
            .unwrap();
    }

    fn blob_for(id: &str) -> Vec<u8> {
        let cache = InMemoryTokenCache::new();
        add_tokens(&cache, id);
        cache.serialize().unwrap()
    }

    #[tokio::test]
    async fn test_round_trip_through_store() {
        let store: Arc<dyn ByteStore> = Arc::new(InMemoryByteStore::new());
        let factory = TokenCacheProviderFactory::new(store.clone());

        let writer_cache = InMemoryTokenCache::new();
        factory
            .new_provider(CacheKey::new("alice-key"))
            .initialize(&writer_cache);
        writer_cache.notify_before_access().await.unwrap();
        add_tokens(&writer_cache, "alice");
        writer_cache.notify_after_access(true).await.unwrap();
        let written = writer_cache.serialize().unwrap();

        let reader_cache = InMemoryTokenCache::new();
        factory
            .new_provider(CacheKey::new("alice-key"))
            .initialize(&reader_cache);
        reader_cache.notify_before_access().await.unwrap();

        assert_eq!(reader_cache.serialize().unwrap(), written);
        assert_eq!(store.get("alice-key").await.unwrap(), Some(written));
    }

    #[tokio::test]
    async fn test_before_access_replaces_in_memory_content() {
        let store = Arc::new(InMemoryByteStore::new());
        store.set("alice-key", &blob_for("alice")).await.unwrap();

        let cache = InMemoryTokenCache::new();
        add_tokens(&cache, "bob");

        let provider = Arc::new(DistributedTokenCacheProvider::new(
            CacheKey::new("alice-key"),
            store,
        ));
        provider.initialize(&cache);
        cache.notify_before_access().await.unwrap();

        let accounts = cache.accounts().unwrap();
        assert_eq!(accounts, vec![account("alice")]);
    }

    #[tokio::test]
    async fn test_absent_blob_empties_cache() {
        let store = Arc::new(InMemoryByteStore::new());
        let cache = InMemoryTokenCache::new();
        add_tokens(&cache, "bob");

        let provider = Arc::new(DistributedTokenCacheProvider::new(
            CacheKey::new("unknown-key"),
            store,
        ));
        provider.initialize(&cache);
        cache.notify_before_access().await.unwrap();

        assert!(cache.accounts().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_after_access_writes_only_when_changed() {
        let store = Arc::new(CountingStore::default());
        let cache = InMemoryTokenCache::new();
        let provider = Arc::new(DistributedTokenCacheProvider::new(
            CacheKey::new("k"),
            store.clone(),
        ));
        provider.initialize(&cache);

        cache.notify_before_access().await.unwrap();
        cache.notify_after_access(false).await.unwrap();
        assert_eq!(store.sets.load(Ordering::SeqCst), 0);

        cache.notify_before_access().await.unwrap();
        add_tokens(&cache, "alice");
        cache.notify_after_access(true).await.unwrap();
        assert_eq!(store.sets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_empty_key_is_pass_through() {
        let store = Arc::new(CountingStore::default());
        let cache = InMemoryTokenCache::new();
        add_tokens(&cache, "bob");
        let before = cache.serialize().unwrap();

        let provider = Arc::new(DistributedTokenCacheProvider::new(
            CacheKey::default(),
            store.clone(),
        ));
        provider.initialize(&cache);

        cache.notify_before_access().await.unwrap();
        cache.notify_after_access(true).await.unwrap();
        provider.clear().await.unwrap();

        assert_eq!(store.gets.load(Ordering::SeqCst), 0);
        assert_eq!(store.sets.load(Ordering::SeqCst), 0);
        assert_eq!(cache.serialize().unwrap(), before);
    }

    #[tokio::test]
    async fn test_whitespace_key_is_not_pass_through() {
        let store = Arc::new(CountingStore::default());
        let cache = InMemoryTokenCache::new();
        add_tokens(&cache, "bob");

        let provider = Arc::new(DistributedTokenCacheProvider::new(
            CacheKey::new(" "),
            store.clone(),
        ));
        provider.initialize(&cache);

        cache.notify_before_access().await.unwrap();
        add_tokens(&cache, "bob");
        cache.notify_after_access(true).await.unwrap();

        assert_eq!(store.gets.load(Ordering::SeqCst), 1);
        assert_eq!(store.sets.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_clear_removes_only_bound_key() {
        let store: Arc<dyn ByteStore> = Arc::new(InMemoryByteStore::new());
        store.set("alice-key", &blob_for("alice")).await.unwrap();
        store.set("bob-key", &blob_for("bob")).await.unwrap();

        let factory = TokenCacheProviderFactory::new(store.clone());
        factory
            .new_provider(CacheKey::new("alice-key"))
            .clear()
            .await
            .unwrap();

        assert_eq!(store.get("alice-key").await.unwrap(), None);
        assert!(store.get("bob-key").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_load_failure_propagates_and_releases_lock() {
        let store = Arc::new(CountingStore::default());
        store.fail.store(true, Ordering::SeqCst);
        let factory = TokenCacheProviderFactory::new(store.clone());

        let cache = InMemoryTokenCache::new();
        factory.new_provider(CacheKey::new("k")).initialize(&cache);
        let result = cache.notify_before_access().await;
        assert!(matches!(result, Err(TokenCacheError::Database(_))));

        store.fail.store(false, Ordering::SeqCst);
        let other = InMemoryTokenCache::new();
        factory.new_provider(CacheKey::new("k")).initialize(&other);
        tokio::time::timeout(Duration::from_secs(1), other.notify_before_access())
            .await
            .expect("lock was released after failed load")
            .unwrap();
    }

    #[tokio::test]
    async fn test_providers_on_same_key_are_serialized() {
        let store: Arc<dyn ByteStore> = Arc::new(InMemoryByteStore::new());
        let factory = TokenCacheProviderFactory::new(store.clone());

        let first = InMemoryTokenCache::new();
        factory.new_provider(CacheKey::new("shared")).initialize(&first);
        first.notify_before_access().await.unwrap();

        let second_task = {
            let factory = factory.clone();
            tokio::spawn(async move {
                let second = InMemoryTokenCache::new();
                factory.new_provider(CacheKey::new("shared")).initialize(&second);
                second.notify_before_access().await.unwrap();
                let seen = second.accounts().unwrap();
                second.notify_after_access(false).await.unwrap();
                seen
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!second_task.is_finished());

        add_tokens(&first, "alice");
        first.notify_after_access(true).await.unwrap();

        let seen = tokio::time::timeout(Duration::from_secs(1), second_task)
            .await
            .expect("second provider proceeds after release")
            .unwrap();
        // The second load observed the first provider's write.
        assert_eq!(seen, vec![account("alice")]);
    }

    #[tokio::test]
    async fn test_providers_on_different_keys_run_concurrently() {
        let factory = TokenCacheProviderFactory::new(Arc::new(InMemoryByteStore::new()));

        let a = InMemoryTokenCache::new();
        factory.new_provider(CacheKey::new("a")).initialize(&a);
        a.notify_before_access().await.unwrap();

        let b = InMemoryTokenCache::new();
        factory.new_provider(CacheKey::new("b")).initialize(&b);
        tokio::time::timeout(Duration::from_millis(200), b.notify_before_access())
            .await
            .expect("different key does not block")
            .unwrap();
    }
}
