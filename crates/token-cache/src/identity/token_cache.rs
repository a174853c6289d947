//! In-memory, JSON-serializable token cache.
//!
//! This is the cache instance an identity client owns. It knows nothing about
//! persistence: a registered [`TokenCacheHooks`] implementation loads and
//! stores it around every client operation.
//!
//! Serialization is deterministic (ordered maps), so serializing an unchanged
//! cache yields the same bytes it was loaded from.

use super::{Account, TokenCache, TokenCacheHooks, TokenCacheNotification};
use crate::errors::TokenCacheError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};

/// Cached refresh token for one home account.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedRefreshToken {
    pub home_account_id: String,
    pub client_id: String,
    pub secret: String,
}

impl fmt::Debug for CachedRefreshToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedRefreshToken")
            .field("home_account_id", &self.home_account_id)
            .field("client_id", &self.client_id)
            .field("secret", &"[REDACTED]")
            .finish()
    }
}

/// Cached access token for one home account and scope set.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedAccessToken {
    pub home_account_id: String,
    pub scopes: Vec<String>,
    pub secret: String,
    pub expires_on: DateTime<Utc>,
}

impl fmt::Debug for CachedAccessToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CachedAccessToken")
            .field("home_account_id", &self.home_account_id)
            .field("scopes", &self.scopes)
            .field("secret", &"[REDACTED]")
            .field("expires_on", &self.expires_on)
            .finish()
    }
}

/// Everything the cache holds. This is what gets serialized.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheState {
    #[serde(default)]
    pub accounts: BTreeMap<String, Account>,
    #[serde(default)]
    pub refresh_tokens: BTreeMap<String, CachedRefreshToken>,
    #[serde(default)]
    pub access_tokens: BTreeMap<String, CachedAccessToken>,
}

impl CacheState {
    fn merge(&mut self, other: CacheState) {
        self.accounts.extend(other.accounts);
        self.refresh_tokens.extend(other.refresh_tokens);
        self.access_tokens.extend(other.access_tokens);
    }
}

/// Normalized lookup key for an access token.
#[must_use]
pub fn access_token_key(home_account_id: &str, scopes: &[String]) -> String {
    let mut normalized: Vec<String> = scopes.iter().map(|s| s.to_lowercase()).collect();
    normalized.sort();
    normalized.dedup();
    format!("{home_account_id}|{}", normalized.join(" "))
}

/// Identity-client-owned token cache.
#[derive(Default)]
pub struct InMemoryTokenCache {
    state: Mutex<CacheState>,
    hooks: RwLock<Option<Arc<dyn TokenCacheHooks>>>,
}

impl InMemoryTokenCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a cache pre-populated with state (tests, migrations).
    #[must_use]
    pub fn with_state(state: CacheState) -> Self {
        Self {
            state: Mutex::new(state),
            hooks: RwLock::new(None),
        }
    }

    fn lock_state(&self) -> Result<std::sync::MutexGuard<'_, CacheState>, TokenCacheError> {
        self.state
            .lock()
            .map_err(|_| TokenCacheError::Internal("token cache state lock poisoned".into()))
    }

    fn hooks(&self) -> Option<Arc<dyn TokenCacheHooks>> {
        self.hooks.read().ok().and_then(|guard| guard.clone())
    }

    /// Whether hooks have been registered.
    #[must_use]
    pub fn has_hooks(&self) -> bool {
        self.hooks().is_some()
    }

    /// Copy of the current state.
    ///
    /// # Errors
    ///
    /// Returns `TokenCacheError::Internal` if the state lock is poisoned.
    pub fn snapshot(&self) -> Result<CacheState, TokenCacheError> {
        Ok(self.lock_state()?.clone())
    }

    /// Accounts currently in memory.
    ///
    /// # Errors
    ///
    /// Returns `TokenCacheError::Internal` if the state lock is poisoned.
    pub fn accounts(&self) -> Result<Vec<Account>, TokenCacheError> {
        Ok(self.lock_state()?.accounts.values().cloned().collect())
    }

    /// Access token for an account and scope set, if cached.
    ///
    /// # Errors
    ///
    /// Returns `TokenCacheError::Internal` if the state lock is poisoned.
    pub fn access_token(
        &self,
        home_account_id: &str,
        scopes: &[String],
    ) -> Result<Option<CachedAccessToken>, TokenCacheError> {
        let key = access_token_key(home_account_id, scopes);
        Ok(self.lock_state()?.access_tokens.get(&key).cloned())
    }

    /// Refresh token for an account, if cached.
    ///
    /// # Errors
    ///
    /// Returns `TokenCacheError::Internal` if the state lock is poisoned.
    pub fn refresh_token(
        &self,
        home_account_id: &str,
    ) -> Result<Option<CachedRefreshToken>, TokenCacheError> {
        Ok(self
            .lock_state()?
            .refresh_tokens
            .get(home_account_id)
            .cloned())
    }

    /// Store the outcome of a token grant.
    ///
    /// # Errors
    ///
    /// Returns `TokenCacheError::Internal` if the state lock is poisoned.
    pub fn save_tokens(
        &self,
        account: &Account,
        access_token: CachedAccessToken,
        refresh_token: Option<CachedRefreshToken>,
    ) -> Result<(), TokenCacheError> {
        let home = account.home_account_id.identifier.clone();
        let mut state = self.lock_state()?;

        state.accounts.insert(home.clone(), account.clone());
        let key = access_token_key(&home, &access_token.scopes);
        state.access_tokens.insert(key, access_token);
        if let Some(refresh_token) = refresh_token {
            state.refresh_tokens.insert(home, refresh_token);
        }
        Ok(())
    }

    /// Fire `before_access` on the registered hooks, if any.
    ///
    /// # Errors
    ///
    /// Propagates the hook's error.
    pub async fn notify_before_access(&self) -> Result<(), TokenCacheError> {
        match self.hooks() {
            Some(hooks) => {
                hooks
                    .before_access(&TokenCacheNotification {
                        token_cache: self,
                        has_state_changed: false,
                    })
                    .await
            }
            None => Ok(()),
        }
    }

    /// Fire `before_write` on the registered hooks, if any.
    ///
    /// # Errors
    ///
    /// Propagates the hook's error.
    pub async fn notify_before_write(&self) -> Result<(), TokenCacheError> {
        match self.hooks() {
            Some(hooks) => {
                hooks
                    .before_write(&TokenCacheNotification {
                        token_cache: self,
                        has_state_changed: false,
                    })
                    .await
            }
            None => Ok(()),
        }
    }

    /// Fire `after_access` on the registered hooks, if any.
    ///
    /// # Errors
    ///
    /// Propagates the hook's error.
    pub async fn notify_after_access(&self, has_state_changed: bool) -> Result<(), TokenCacheError> {
        match self.hooks() {
            Some(hooks) => {
                hooks
                    .after_access(&TokenCacheNotification {
                        token_cache: self,
                        has_state_changed,
                    })
                    .await
            }
            None => Ok(()),
        }
    }
}

impl TokenCache for InMemoryTokenCache {
    fn set_hooks(&self, hooks: Arc<dyn TokenCacheHooks>) {
        match self.hooks.write() {
            Ok(mut slot) => *slot = Some(hooks),
            Err(poisoned) => *poisoned.into_inner() = Some(hooks),
        }
    }

    fn serialize(&self) -> Result<Vec<u8>, TokenCacheError> {
        let state = self.lock_state()?;
        Ok(serde_json::to_vec(&*state)?)
    }

    fn deserialize(
        &self,
        bytes: Option<&[u8]>,
        clear_existing: bool,
    ) -> Result<(), TokenCacheError> {
        let incoming = match bytes {
            Some(bytes) if !bytes.is_empty() => Some(serde_json::from_slice::<CacheState>(bytes)?),
            _ => None,
        };

        let mut state = self.lock_state()?;
        if clear_existing {
            *state = CacheState::default();
        }
        if let Some(incoming) = incoming {
            state.merge(incoming);
        }
        Ok(())
    }
}
