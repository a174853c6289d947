//! Token cache models.
//!
//! Contains the activity record that marks an account for background refresh.

use crate::cache_key::CacheKey;
use crate::identity::{Account, HomeAccountId};
use serde::{Deserialize, Serialize};

/// An account eligible for scheduled token refresh.
///
/// Holds just enough to rebuild an [`Account`] without interactive sign-in,
/// plus the cache key its serialized token state lives under.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
pub struct AccountActivity {
    /// Byte-store partition key. Unique per row.
    pub cache_key: String,

    /// Home account identifier.
    pub account_identifier: String,

    pub account_object_id: String,

    pub account_tenant_id: String,

    /// Identity provider instance.
    pub environment: String,

    /// Display name. Informational only.
    pub username: String,

    /// Set when the last silent refresh needed user interaction.
    pub failed_to_refresh: bool,
}

impl AccountActivity {
    /// Activity row for `account` stored under `cache_key`.
    #[must_use]
    pub fn new(account: &Account, cache_key: &CacheKey) -> Self {
        Self {
            cache_key: cache_key.as_str().to_string(),
            account_identifier: account.home_account_id.identifier.clone(),
            account_object_id: account.home_account_id.object_id.clone(),
            account_tenant_id: account.home_account_id.tenant_id.clone(),
            environment: account.environment.clone(),
            username: account.username.clone(),
            failed_to_refresh: false,
        }
    }

    #[must_use]
    pub fn cache_key(&self) -> CacheKey {
        CacheKey::new(self.cache_key.clone())
    }

    /// Rebuild the identity-client account reference.
    #[must_use]
    pub fn to_account(&self) -> Account {
        Account {
            home_account_id: HomeAccountId::new(
                self.account_identifier.clone(),
                self.account_object_id.clone(),
                self.account_tenant_id.clone(),
            ),
            environment: self.environment.clone(),
            username: self.username.clone(),
        }
    }
}
