//! Test fixtures: accounts, activity rows and serialized caches.
//!
//! Fixture accounts are derived from a short name: `alice` becomes home
//! account `alice.test-tenant`, username `alice@example.com`.

use chrono::{Duration, Utc};
use token_cache::identity::token_cache::{CachedAccessToken, CachedRefreshToken};
use token_cache::identity::{Account, HomeAccountId, InMemoryTokenCache, TokenCache};
use token_cache::models::AccountActivity;
use token_cache::store::ByteStore;
use token_cache::CacheKey;

/// Tenant used by every fixture account.
pub const TEST_TENANT: &str = "test-tenant";

/// Client id stamped on fixture refresh tokens.
pub const TEST_CLIENT_ID: &str = "test-client";

/// Scopes the fixtures and the daemon tests request.
#[must_use]
pub fn test_scopes() -> Vec<String> {
    vec!["User.Read".to_string()]
}

/// Account for a short name.
#[must_use]
pub fn test_account(name: &str) -> Account {
    Account {
        home_account_id: HomeAccountId::new(
            format!("{name}.{TEST_TENANT}"),
            name.to_string(),
            TEST_TENANT.to_string(),
        ),
        environment: "login.example.com".to_string(),
        username: format!("{name}@example.com"),
    }
}

/// Activity row for `name` stored under `cache_key`.
#[must_use]
pub fn test_activity(cache_key: &str, name: &str) -> AccountActivity {
    AccountActivity::new(&test_account(name), &CacheKey::new(cache_key))
}

/// In-memory cache holding an expired access token and a refresh token for `name`.
#[must_use]
pub fn seeded_cache(name: &str) -> InMemoryTokenCache {
    let cache = InMemoryTokenCache::new();
    let account = test_account(name);
    let home = account.home_account_id.identifier.clone();
    cache
        .save_tokens(
            &account,
            CachedAccessToken {
                home_account_id: home.clone(),
                scopes: test_scopes(),
                secret: format!("at-{name}-0"),
                expires_on: Utc::now() - Duration::minutes(1),
            },
            Some(CachedRefreshToken {
                home_account_id: home,
                client_id: TEST_CLIENT_ID.to_string(),
                secret: format!("rt-{name}-0"),
            }),
        )
        .expect("seed fixture cache");
    cache
}

/// Serialized form of [`seeded_cache`].
#[must_use]
pub fn seeded_cache_blob(name: &str) -> Vec<u8> {
    seeded_cache(name)
        .serialize()
        .expect("serialize fixture cache")
}

/// Store the seeded cache for `name` under `cache_key`.
pub async fn seed_store(store: &dyn ByteStore, cache_key: &str, name: &str) {
    store
        .set(cache_key, &seeded_cache_blob(name))
        .await
        .expect("seed byte store");
}

/// Load the stored cache under `cache_key`, if any.
pub async fn load_stored_cache(store: &dyn ByteStore, cache_key: &str) -> Option<InMemoryTokenCache> {
    let blob = store.get(cache_key).await.expect("read byte store")?;
    let cache = InMemoryTokenCache::new();
    cache
        .deserialize(Some(&blob), true)
        .expect("stored blob deserializes");
    Some(cache)
}

#[cfg(test)]
mod tests {
    use super::*;
    use token_cache::store::InMemoryByteStore;

    #[test]
    fn test_activity_round_trips_to_account() {
        let activity = test_activity("alice-key", "alice");
        assert_eq!(activity.to_account(), test_account("alice"));
        assert!(!activity.failed_to_refresh);
    }

    #[tokio::test]
    async fn test_seed_and_load_store() {
        let store = InMemoryByteStore::new();
        seed_store(&store, "k", "alice").await;

        let cache = load_stored_cache(&store, "k").await.unwrap();
        let rt = cache.refresh_token("alice.test-tenant").unwrap().unwrap();
        assert_eq!(rt.secret, "rt-alice-0");
        assert!(load_stored_cache(&store, "missing").await.is_none());
    }
}
