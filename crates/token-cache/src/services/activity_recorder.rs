//! Web-path activity recording.
//!
//! Called once a request's credential has validated and the client's cache
//! provider is bound to the request's cache key. Enumerating the client's
//! accounts loads the cache through the provider; the matching account is
//! then recorded so the refresh daemon picks it up.
//!
//! Recording is best-effort: failures are logged and reported as `None`,
//! never surfaced to the request.

use crate::cache_key::CacheKey;
use crate::identity::ConfidentialClient;
use crate::models::AccountActivity;
use crate::repositories::AccountActivityRepositoryTrait;
use tracing::{debug, instrument, warn};

/// Record the account behind `cache_key` for background refresh.
///
/// With a `login_hint` (interactive sign-in) the account whose username
/// matches it, case-insensitively, is recorded. Without one (on-behalf-of
/// calls, where the cache holds a single account) the first account is.
#[instrument(skip_all, fields(has_login_hint = login_hint.is_some()))]
pub async fn record_account_activity(
    client: &dyn ConfidentialClient,
    repository: &dyn AccountActivityRepositoryTrait,
    cache_key: &CacheKey,
    login_hint: Option<&str>,
) -> Option<AccountActivity> {
    if cache_key.is_empty() {
        debug!(target: "tc.services.activity", "Empty cache key, activity not recorded");
        return None;
    }

    let accounts = match client.get_accounts().await {
        Ok(accounts) => accounts,
        Err(e) => {
            warn!(target: "tc.services.activity", error = %e, "Failed to enumerate accounts");
            return None;
        }
    };

    let account = match login_hint {
        Some(hint) => accounts
            .iter()
            .find(|a| a.username.eq_ignore_ascii_case(hint)),
        None => accounts.first(),
    };

    let Some(account) = account else {
        warn!(
            target: "tc.services.activity",
            accounts = accounts.len(),
            "No matching account in token cache"
        );
        return None;
    };

    let activity = AccountActivity::new(account, cache_key);
    if let Err(e) = repository.upsert_activity(&activity).await {
        warn!(target: "tc.services.activity", error = %e, "Failed to record account activity");
        return None;
    }

    debug!(target: "tc.services.activity", "Recorded account activity");
    Some(activity)
}
