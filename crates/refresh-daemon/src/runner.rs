//! Refresh runner: one pass over every tracked account.
//!
//! For each account row, sequentially:
//! 1. Build a fresh confidential client (empty in-memory cache)
//! 2. Bind a provider for the row's cache key
//! 3. Silently acquire a token for the configured scopes
//!
//! The provider loads the stored cache before the acquisition and writes it
//! back if the client refreshed anything, so a success needs no further
//! persistence here. Accounts that need the user back are flagged with
//! `failed_to_refresh`; a later success clears the flag.
//!
//! One account's failure never stops the pass. Only a run of consecutive
//! store failures (the store is likely down for everyone) aborts it.

use crate::errors::RefreshError;
use crate::observability::metrics::{record_refresh_attempt, record_refresh_cycle};
use std::sync::Arc;
use std::time::Instant;
use token_cache::identity::ConfidentialClientFactory;
use token_cache::models::AccountActivity;
use token_cache::provider::TokenCacheProviderFactory;
use token_cache::repositories::AccountActivityRepositoryTrait;
use token_cache::TokenCacheError;
use tracing::{debug, info, instrument, warn};

/// Counts for one refresh pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RefreshSummary {
    pub processed: usize,
    pub refreshed: usize,
    pub interaction_required: usize,
    pub failed: usize,
}

/// Runner settings.
#[derive(Debug, Clone)]
pub struct RefreshRunnerConfig {
    /// Scopes requested for every account.
    pub scopes: Vec<String>,
    /// Consecutive store failures that abort a pass.
    pub max_consecutive_failures: u32,
}

/// Refreshes every tracked account once per [`RefreshRunner::run_once`].
pub struct RefreshRunner {
    clients: Arc<dyn ConfidentialClientFactory>,
    providers: TokenCacheProviderFactory,
    repository: Arc<dyn AccountActivityRepositoryTrait>,
    config: RefreshRunnerConfig,
}

impl RefreshRunner {
    #[must_use]
    pub fn new(
        clients: Arc<dyn ConfidentialClientFactory>,
        providers: TokenCacheProviderFactory,
        repository: Arc<dyn AccountActivityRepositoryTrait>,
        config: RefreshRunnerConfig,
    ) -> Self {
        Self {
            clients,
            providers,
            repository,
            config,
        }
    }

    /// Run one refresh pass over all tracked accounts.
    ///
    /// # Errors
    ///
    /// - `RefreshError::Repository` if the account list cannot be loaded
    /// - `RefreshError::SystemicFailure` after `max_consecutive_failures`
    ///   consecutive store failures
    #[instrument(skip_all, name = "daemon.runner.run_once")]
    pub async fn run_once(&self) -> Result<RefreshSummary, RefreshError> {
        let start = Instant::now();
        let result = self.run_pass().await;

        match &result {
            Ok(summary) => {
                record_refresh_cycle("success", start.elapsed(), summary.processed);
                info!(
                    target: "daemon.runner",
                    processed = summary.processed,
                    refreshed = summary.refreshed,
                    interaction_required = summary.interaction_required,
                    failed = summary.failed,
                    duration_ms = start.elapsed().as_millis(),
                    "Refresh cycle complete"
                );
            }
            Err(e) => {
                record_refresh_cycle("error", start.elapsed(), 0);
                warn!(target: "daemon.runner", error = %e, "Refresh cycle aborted");
            }
        }

        result
    }

    async fn run_pass(&self) -> Result<RefreshSummary, RefreshError> {
        let candidates = self.repository.get_accounts_to_refresh().await?;
        debug!(target: "daemon.runner", accounts = candidates.len(), "Loaded accounts to refresh");

        let mut summary = RefreshSummary::default();
        let mut consecutive_store_failures: u32 = 0;

        for activity in candidates {
            summary.processed += 1;

            let outcome = self.refresh_account(&activity).await;
            let bookkeeping = self.update_failed_flag(&activity, &outcome).await;

            match &outcome {
                Ok(()) => {
                    summary.refreshed += 1;
                    record_refresh_attempt("refreshed");
                    info!(
                        target: "daemon.runner",
                        account = %activity.account_object_id,
                        "Token refreshed"
                    );
                }
                Err(e) if e.is_interaction_required() => {
                    summary.interaction_required += 1;
                    record_refresh_attempt("interaction_required");
                    info!(
                        target: "daemon.runner",
                        account = %activity.account_object_id,
                        reason = %e,
                        "Account needs interactive sign-in"
                    );
                }
                Err(e) => {
                    summary.failed += 1;
                    record_refresh_attempt("failed");
                    warn!(
                        target: "daemon.runner",
                        account = %activity.account_object_id,
                        error = %e,
                        error_category = e.category(),
                        "Token refresh failed"
                    );
                }
            }

            let store_failure = match (&outcome, &bookkeeping) {
                (Err(e), _) if e.is_retryable() => Some(e.clone()),
                (_, Err(e)) => Some(e.clone()),
                _ => None,
            };

            match store_failure {
                Some(last_error) => {
                    consecutive_store_failures += 1;
                    if consecutive_store_failures >= self.config.max_consecutive_failures {
                        return Err(RefreshError::SystemicFailure {
                            consecutive_failures: consecutive_store_failures,
                            last_error,
                        });
                    }
                }
                None => consecutive_store_failures = 0,
            }
        }

        Ok(summary)
    }

    /// Silent acquisition for one account through a freshly bound provider.
    async fn refresh_account(&self, activity: &AccountActivity) -> Result<(), TokenCacheError> {
        let client = self.clients.build()?;

        let provider = self.providers.new_provider(activity.cache_key());
        provider.initialize(client.user_token_cache());

        let account = activity.to_account();
        client
            .acquire_token_silent(&self.config.scopes, &account)
            .await?;
        Ok(())
    }

    /// Keep `failed_to_refresh` in line with the latest outcome.
    async fn update_failed_flag(
        &self,
        activity: &AccountActivity,
        outcome: &Result<(), TokenCacheError>,
    ) -> Result<(), TokenCacheError> {
        let failed_to_refresh = match outcome {
            Ok(()) => false,
            Err(e) if e.is_interaction_required() => true,
            Err(_) => return Ok(()),
        };

        if activity.failed_to_refresh == failed_to_refresh {
            return Ok(());
        }

        let found = self
            .repository
            .set_failed_to_refresh(&activity.cache_key(), failed_to_refresh)
            .await
            .map_err(|e| {
                warn!(
                    target: "daemon.runner",
                    account = %activity.account_object_id,
                    error = %e,
                    "Failed to update refresh status"
                );
                e
            })?;

        if !found {
            debug!(
                target: "daemon.runner",
                account = %activity.account_object_id,
                "Activity row removed during cycle, refresh status not updated"
            );
        }
        Ok(())
    }
}
