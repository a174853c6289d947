//! Scripted confidential client for refresh tests.
//!
//! Behaves like a real identity client towards its token cache: it fires
//! `before_access`, `before_write` and `after_access` in the same order, and
//! a successful refresh rotates both tokens and reports a state change.
//!
//! Outcomes are scripted per account object id (the fixture short name).
//! Unscripted accounts refresh normally; an account without a cached
//! refresh token needs interaction, as with a real client.
//!
//! # Example
//!
//! ```rust,ignore
//! use tc_test_utils::{MockClientFactory, MockOutcome};
//!
//! let factory = MockClientFactory::new()
//!     .with_outcome("bob", MockOutcome::InteractionRequired);
//! ```

use async_trait::async_trait;
use chrono::{Duration, Utc};
use common::secret::SecretString;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use token_cache::identity::token_cache::{CachedAccessToken, CachedRefreshToken};
use token_cache::identity::{
    Account, AuthenticationResult, ConfidentialClient, ConfidentialClientFactory,
    InMemoryTokenCache, TokenCache,
};
use token_cache::TokenCacheError;

use crate::fixtures::TEST_CLIENT_ID;

/// Scripted result of `acquire_token_silent` for one account.
#[derive(Debug, Clone)]
pub enum MockOutcome {
    /// Redeem the cached refresh token (needs one in the loaded cache).
    Refresh,
    /// Fail with `InteractionRequired` without touching the cache.
    InteractionRequired,
    /// Fail with the given error without touching the cache.
    Fail(TokenCacheError),
}

#[derive(Debug, Default)]
struct Script {
    outcomes: Mutex<HashMap<String, MockOutcome>>,
    attempts: Mutex<Vec<String>>,
    refreshes: AtomicUsize,
}

impl Script {
    fn outcome_for(&self, object_id: &str) -> MockOutcome {
        self.outcomes
            .lock()
            .unwrap()
            .get(object_id)
            .cloned()
            .unwrap_or(MockOutcome::Refresh)
    }
}

/// Mock confidential client over an [`InMemoryTokenCache`].
pub struct MockConfidentialClient {
    cache: InMemoryTokenCache,
    script: Arc<Script>,
}

impl MockConfidentialClient {
    /// A client whose accounts all refresh normally.
    #[must_use]
    pub fn new() -> Self {
        Self {
            cache: InMemoryTokenCache::new(),
            script: Arc::new(Script::default()),
        }
    }

    #[must_use]
    pub fn token_cache(&self) -> &InMemoryTokenCache {
        &self.cache
    }

    async fn refresh(
        &self,
        scopes: &[String],
        account: &Account,
    ) -> Result<AuthenticationResult, TokenCacheError> {
        let home = &account.home_account_id.identifier;
        if self.cache.refresh_token(home)?.is_none() {
            return Err(TokenCacheError::InteractionRequired(
                "no refresh token cached for account".to_string(),
            ));
        }

        let generation = self.script.refreshes.fetch_add(1, Ordering::SeqCst) + 1;
        let name = &account.home_account_id.object_id;
        let expires_on = Utc::now() + Duration::hours(1);

        self.cache.notify_before_write().await?;
        self.cache.save_tokens(
            account,
            CachedAccessToken {
                home_account_id: home.clone(),
                scopes: scopes.to_vec(),
                secret: format!("at-{name}-{generation}"),
                expires_on,
            },
            Some(CachedRefreshToken {
                home_account_id: home.clone(),
                client_id: TEST_CLIENT_ID.to_string(),
                secret: format!("rt-{name}-{generation}"),
            }),
        )?;

        Ok(AuthenticationResult {
            access_token: SecretString::from(format!("at-{name}-{generation}")),
            expires_on,
            scopes: scopes.to_vec(),
            account: account.clone(),
        })
    }
}

impl Default for MockConfidentialClient {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ConfidentialClient for MockConfidentialClient {
    fn user_token_cache(&self) -> &dyn TokenCache {
        &self.cache
    }

    async fn get_accounts(&self) -> Result<Vec<Account>, TokenCacheError> {
        self.cache.notify_before_access().await?;
        let accounts = self.cache.accounts();
        self.cache.notify_after_access(false).await?;
        accounts
    }

    async fn acquire_token_silent(
        &self,
        scopes: &[String],
        account: &Account,
    ) -> Result<AuthenticationResult, TokenCacheError> {
        self.cache.notify_before_access().await?;

        let object_id = account.home_account_id.object_id.clone();
        self.script.attempts.lock().unwrap().push(object_id.clone());

        let result = match self.script.outcome_for(&object_id) {
            MockOutcome::Refresh => self.refresh(scopes, account).await,
            MockOutcome::InteractionRequired => Err(TokenCacheError::InteractionRequired(
                "interaction_required".to_string(),
            )),
            MockOutcome::Fail(e) => Err(e),
        };

        self.cache.notify_after_access(result.is_ok()).await?;
        result
    }
}

/// Factory handing out [`MockConfidentialClient`]s that share one script.
#[derive(Clone, Default)]
pub struct MockClientFactory {
    script: Arc<Script>,
    builds: Arc<AtomicUsize>,
}

impl MockClientFactory {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Script the outcome for the account with object id `name`.
    #[must_use]
    pub fn with_outcome(self, name: &str, outcome: MockOutcome) -> Self {
        self.set_outcome(name, outcome);
        self
    }

    /// Change the scripted outcome between cycles.
    pub fn set_outcome(&self, name: &str, outcome: MockOutcome) {
        self.script
            .outcomes
            .lock()
            .unwrap()
            .insert(name.to_string(), outcome);
    }

    /// Object ids passed to `acquire_token_silent`, in call order.
    #[must_use]
    pub fn attempts(&self) -> Vec<String> {
        self.script.attempts.lock().unwrap().clone()
    }

    /// Number of successful refreshes.
    #[must_use]
    pub fn refresh_count(&self) -> usize {
        self.script.refreshes.load(Ordering::SeqCst)
    }

    /// Number of clients built.
    #[must_use]
    pub fn build_count(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }
}

impl ConfidentialClientFactory for MockClientFactory {
    fn build(&self) -> Result<Box<dyn ConfidentialClient>, TokenCacheError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(MockConfidentialClient {
            cache: InMemoryTokenCache::new(),
            script: Arc::clone(&self.script),
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixtures::{seeded_cache_blob, test_account, test_scopes};

    #[tokio::test]
    async fn test_refresh_rotates_tokens() {
        let client = MockConfidentialClient::new();
        client
            .token_cache()
            .deserialize(Some(&seeded_cache_blob("alice")), true)
            .unwrap();

        let result = client
            .acquire_token_silent(&test_scopes(), &test_account("alice"))
            .await
            .unwrap();

        assert_eq!(result.account, test_account("alice"));
        let rt = client
            .token_cache()
            .refresh_token("alice.test-tenant")
            .unwrap()
            .unwrap();
        assert_eq!(rt.secret, "rt-alice-1");
    }

    #[tokio::test]
    async fn test_empty_cache_requires_interaction() {
        let client = MockConfidentialClient::new();
        let result = client
            .acquire_token_silent(&test_scopes(), &test_account("alice"))
            .await;
        assert!(result.unwrap_err().is_interaction_required());
    }

    #[tokio::test]
    async fn test_factory_scripts_outcomes_and_records_attempts() {
        let factory = MockClientFactory::new()
            .with_outcome("bob", MockOutcome::InteractionRequired)
            .with_outcome(
                "carol",
                MockOutcome::Fail(TokenCacheError::Identity("boom".to_string())),
            );

        let bob = factory.build().unwrap();
        let carol = factory.build().unwrap();

        let bob_result = bob
            .acquire_token_silent(&test_scopes(), &test_account("bob"))
            .await;
        let carol_result = carol
            .acquire_token_silent(&test_scopes(), &test_account("carol"))
            .await;

        assert!(bob_result.unwrap_err().is_interaction_required());
        assert!(matches!(carol_result, Err(TokenCacheError::Identity(_))));
        assert_eq!(factory.attempts(), vec!["bob", "carol"]);
        assert_eq!(factory.build_count(), 2);
        assert_eq!(factory.refresh_count(), 0);
    }
}
