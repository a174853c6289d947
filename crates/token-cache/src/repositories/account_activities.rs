//! Account activity repository.
//!
//! Tracks which cache keys hold an account worth refreshing in the
//! background. The web path upserts a row whenever a user's credential
//! validates; the refresh daemon reads every row each cycle and flips
//! `failed_to_refresh` when silent acquisition needs the user back.
//!
//! # Security
//!
//! - All queries use parameterized statements
//! - Cache keys are not logged (they may be derived from bearer tokens)

use crate::cache_key::CacheKey;
use crate::errors::TokenCacheError;
use crate::models::AccountActivity;
use crate::observability::metrics::{record_db_query, status_label};
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::Instant;
use tracing::{debug, instrument};

const TABLE: &str = "account_activities";

/// Activity persistence operations.
#[async_trait]
pub trait AccountActivityRepositoryTrait: Send + Sync {
    /// Insert or replace the row for `activity.cache_key`.
    async fn upsert_activity(&self, activity: &AccountActivity) -> Result<(), TokenCacheError>;

    /// Every tracked account, including ones whose last refresh failed.
    async fn get_accounts_to_refresh(&self) -> Result<Vec<AccountActivity>, TokenCacheError>;

    async fn get_activity(
        &self,
        cache_key: &CacheKey,
    ) -> Result<Option<AccountActivity>, TokenCacheError>;

    /// Set only `failed_to_refresh` on an existing row, leaving the account
    /// columns as the web path last wrote them. Returns whether a row existed.
    async fn set_failed_to_refresh(
        &self,
        cache_key: &CacheKey,
        failed_to_refresh: bool,
    ) -> Result<bool, TokenCacheError>;

    /// Remove the row for `cache_key`. Returns whether a row existed.
    async fn delete_activity(&self, cache_key: &CacheKey) -> Result<bool, TokenCacheError>;
}

/// Postgres-backed activity repository.
#[derive(Clone)]
pub struct AccountActivityRepository {
    pool: PgPool,
}

impl AccountActivityRepository {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountActivityRepositoryTrait for AccountActivityRepository {
    #[instrument(skip_all, fields(failed_to_refresh = activity.failed_to_refresh))]
    async fn upsert_activity(&self, activity: &AccountActivity) -> Result<(), TokenCacheError> {
        let start = Instant::now();
        // Single statement: concurrent upserts on one key cannot both insert.
        let result = sqlx::query(
            r#"
            INSERT INTO account_activities (
                cache_key,
                account_identifier,
                account_object_id,
                account_tenant_id,
                environment,
                username,
                failed_to_refresh,
                created_at,
                updated_at
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, NOW(), NOW())
            ON CONFLICT (cache_key) DO UPDATE
            SET account_identifier = EXCLUDED.account_identifier,
                account_object_id = EXCLUDED.account_object_id,
                account_tenant_id = EXCLUDED.account_tenant_id,
                environment = EXCLUDED.environment,
                username = EXCLUDED.username,
                failed_to_refresh = EXCLUDED.failed_to_refresh,
                updated_at = NOW()
            "#,
        )
        .bind(&activity.cache_key)
        .bind(&activity.account_identifier)
        .bind(&activity.account_object_id)
        .bind(&activity.account_tenant_id)
        .bind(&activity.environment)
        .bind(&activity.username)
        .bind(activity.failed_to_refresh)
        .execute(&self.pool)
        .await;
        record_db_query("upsert", TABLE, status_label(&result), start.elapsed());

        result?;
        debug!(target: "tc.repository.activities", "Upserted account activity");
        Ok(())
    }

    #[instrument(skip_all)]
    async fn get_accounts_to_refresh(&self) -> Result<Vec<AccountActivity>, TokenCacheError> {
        let start = Instant::now();
        let result: Result<Vec<AccountActivity>, sqlx::Error> = sqlx::query_as(
            r#"
            SELECT
                cache_key,
                account_identifier,
                account_object_id,
                account_tenant_id,
                environment,
                username,
                failed_to_refresh
            FROM account_activities
            ORDER BY cache_key
            "#,
        )
        .fetch_all(&self.pool)
        .await;
        record_db_query("select", TABLE, status_label(&result), start.elapsed());

        let rows = result?;
        debug!(target: "tc.repository.activities", count = rows.len(), "Loaded accounts to refresh");
        Ok(rows)
    }

    #[instrument(skip_all)]
    async fn get_activity(
        &self,
        cache_key: &CacheKey,
    ) -> Result<Option<AccountActivity>, TokenCacheError> {
        let start = Instant::now();
        let result: Result<Option<AccountActivity>, sqlx::Error> = sqlx::query_as(
            r#"
            SELECT
                cache_key,
                account_identifier,
                account_object_id,
                account_tenant_id,
                environment,
                username,
                failed_to_refresh
            FROM account_activities
            WHERE cache_key = $1
            "#,
        )
        .bind(cache_key.as_str())
        .fetch_optional(&self.pool)
        .await;
        record_db_query("select", TABLE, status_label(&result), start.elapsed());

        Ok(result?)
    }

    #[instrument(skip_all, fields(failed_to_refresh = failed_to_refresh))]
    async fn set_failed_to_refresh(
        &self,
        cache_key: &CacheKey,
        failed_to_refresh: bool,
    ) -> Result<bool, TokenCacheError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            UPDATE account_activities
            SET failed_to_refresh = $2,
                updated_at = NOW()
            WHERE cache_key = $1
            "#,
        )
        .bind(cache_key.as_str())
        .bind(failed_to_refresh)
        .execute(&self.pool)
        .await;
        record_db_query("update", TABLE, status_label(&result), start.elapsed());

        let updated = result?.rows_affected() > 0;
        debug!(target: "tc.repository.activities", updated = updated, "Set refresh status");
        Ok(updated)
    }

    #[instrument(skip_all)]
    async fn delete_activity(&self, cache_key: &CacheKey) -> Result<bool, TokenCacheError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            DELETE FROM account_activities
            WHERE cache_key = $1
            "#,
        )
        .bind(cache_key.as_str())
        .execute(&self.pool)
        .await;
        record_db_query("delete", TABLE, status_label(&result), start.elapsed());

        Ok(result?.rows_affected() > 0)
    }
}

/// In-memory repository for unit tests.
pub mod mock {
    use super::*;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
    use tokio::sync::RwLock;

    /// Mock activity repository backed by an ordered map.
    #[derive(Default)]
    pub struct MockAccountActivityRepository {
        rows: RwLock<BTreeMap<String, AccountActivity>>,
        upsert_count: AtomicUsize,
        flag_update_count: AtomicUsize,
        fail_reads: AtomicBool,
        fail_writes: AtomicBool,
    }

    impl MockAccountActivityRepository {
        #[must_use]
        pub fn new() -> Self {
            Self::default()
        }

        /// Create a mock pre-populated with `activities`.
        #[must_use]
        pub fn with_activities(activities: Vec<AccountActivity>) -> Self {
            let rows = activities
                .into_iter()
                .map(|a| (a.cache_key.clone(), a))
                .collect();
            Self {
                rows: RwLock::new(rows),
                ..Self::default()
            }
        }

        /// Make reads fail with a database error.
        pub fn set_fail_reads(&self, fail: bool) {
            self.fail_reads.store(fail, Ordering::SeqCst);
        }

        /// Make upserts, flag updates and deletes fail with a database error.
        pub fn set_fail_writes(&self, fail: bool) {
            self.fail_writes.store(fail, Ordering::SeqCst);
        }

        /// Number of successful upserts.
        pub fn upsert_count(&self) -> usize {
            self.upsert_count.load(Ordering::SeqCst)
        }

        /// Number of successful `set_failed_to_refresh` calls that hit a row.
        pub fn flag_update_count(&self) -> usize {
            self.flag_update_count.load(Ordering::SeqCst)
        }

        /// Current rows, ordered by cache key.
        pub async fn rows(&self) -> Vec<AccountActivity> {
            self.rows.read().await.values().cloned().collect()
        }

        fn check(flag: &AtomicBool) -> Result<(), TokenCacheError> {
            if flag.load(Ordering::SeqCst) {
                return Err(TokenCacheError::Database(
                    "Mock activity repository error".to_string(),
                ));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl AccountActivityRepositoryTrait for MockAccountActivityRepository {
        async fn upsert_activity(&self, activity: &AccountActivity) -> Result<(), TokenCacheError> {
            Self::check(&self.fail_writes)?;
            self.rows
                .write()
                .await
                .insert(activity.cache_key.clone(), activity.clone());
            self.upsert_count.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        async fn get_accounts_to_refresh(&self) -> Result<Vec<AccountActivity>, TokenCacheError> {
            Self::check(&self.fail_reads)?;
            Ok(self.rows().await)
        }

        async fn get_activity(
            &self,
            cache_key: &CacheKey,
        ) -> Result<Option<AccountActivity>, TokenCacheError> {
            Self::check(&self.fail_reads)?;
            Ok(self.rows.read().await.get(cache_key.as_str()).cloned())
        }

        async fn set_failed_to_refresh(
            &self,
            cache_key: &CacheKey,
            failed_to_refresh: bool,
        ) -> Result<bool, TokenCacheError> {
            Self::check(&self.fail_writes)?;
            let mut rows = self.rows.write().await;
            let Some(row) = rows.get_mut(cache_key.as_str()) else {
                return Ok(false);
            };
            row.failed_to_refresh = failed_to_refresh;
            self.flag_update_count.fetch_add(1, Ordering::SeqCst);
            Ok(true)
        }

        async fn delete_activity(&self, cache_key: &CacheKey) -> Result<bool, TokenCacheError> {
            Self::check(&self.fail_writes)?;
            Ok(self.rows.write().await.remove(cache_key.as_str()).is_some())
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::mock::MockAccountActivityRepository;
    use super::*;

    fn activity(key: &str, user: &str) -> AccountActivity {
        AccountActivity {
            cache_key: key.to_string(),
            account_identifier: format!("{user}.tenant"),
            account_object_id: user.to_string(),
            account_tenant_id: "tenant".to_string(),
            environment: "login.example.com".to_string(),
            username: format!("{user}@example.com"),
            failed_to_refresh: false,
        }
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_upsert_then_get(pool: PgPool) -> Result<(), TokenCacheError> {
        let repo = AccountActivityRepository::new(pool);
        let alice = activity("alice-key", "alice");

        repo.upsert_activity(&alice).await?;

        assert_eq!(
            repo.get_activity(&CacheKey::new("alice-key")).await?,
            Some(alice)
        );
        assert_eq!(repo.get_activity(&CacheKey::new("missing")).await?, None);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_upsert_is_idempotent_and_overwrites(pool: PgPool) -> Result<(), TokenCacheError> {
        let repo = AccountActivityRepository::new(pool);
        let first = activity("k", "alice");
        let mut second = activity("k", "alice-renamed");
        second.failed_to_refresh = true;

        repo.upsert_activity(&first).await?;
        repo.upsert_activity(&first).await?;
        repo.upsert_activity(&second).await?;

        let rows = repo.get_accounts_to_refresh().await?;
        assert_eq!(rows, vec![second]);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_get_accounts_to_refresh_includes_failed_rows(
        pool: PgPool,
    ) -> Result<(), TokenCacheError> {
        let repo = AccountActivityRepository::new(pool);
        let mut failed = activity("b-key", "bob");
        failed.failed_to_refresh = true;

        repo.upsert_activity(&activity("c-key", "carol")).await?;
        repo.upsert_activity(&failed).await?;
        repo.upsert_activity(&activity("a-key", "alice")).await?;

        let keys: Vec<String> = repo
            .get_accounts_to_refresh()
            .await?
            .into_iter()
            .map(|a| a.cache_key)
            .collect();
        assert_eq!(keys, vec!["a-key", "b-key", "c-key"]);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_upsert_bumps_updated_at(pool: PgPool) -> Result<(), TokenCacheError> {
        let repo = AccountActivityRepository::new(pool.clone());
        repo.upsert_activity(&activity("k", "alice")).await?;
        sqlx::query(
            "UPDATE account_activities SET updated_at = NOW() - INTERVAL '1 day', created_at = NOW() - INTERVAL '1 day'",
        )
        .execute(&pool)
        .await?;

        repo.upsert_activity(&activity("k", "alice")).await?;

        let (created_recent, updated_recent): (bool, bool) = sqlx::query_as(
            r#"
            SELECT created_at > NOW() - INTERVAL '1 hour',
                   updated_at > NOW() - INTERVAL '1 hour'
            FROM account_activities WHERE cache_key = 'k'
            "#,
        )
        .fetch_one(&pool)
        .await?;
        assert!(!created_recent);
        assert!(updated_recent);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_delete_activity(pool: PgPool) -> Result<(), TokenCacheError> {
        let repo = AccountActivityRepository::new(pool);
        repo.upsert_activity(&activity("k", "alice")).await?;

        assert!(repo.delete_activity(&CacheKey::new("k")).await?);
        assert!(!repo.delete_activity(&CacheKey::new("k")).await?);
        assert!(repo.get_accounts_to_refresh().await?.is_empty());
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_set_failed_to_refresh_keeps_account_columns(
        pool: PgPool,
    ) -> Result<(), TokenCacheError> {
        let repo = AccountActivityRepository::new(pool.clone());
        let mut reissued = activity("k", "alice");
        reissued.username = "alice-reissued@example.com".to_string();
        reissued.environment = "login.new-cloud.example".to_string();
        repo.upsert_activity(&reissued).await?;
        sqlx::query("UPDATE account_activities SET updated_at = NOW() - INTERVAL '1 day'")
            .execute(&pool)
            .await?;

        assert!(repo.set_failed_to_refresh(&CacheKey::new("k"), true).await?);

        let row = repo.get_activity(&CacheKey::new("k")).await?.unwrap();
        assert!(row.failed_to_refresh);
        assert_eq!(row.username, "alice-reissued@example.com");
        assert_eq!(row.environment, "login.new-cloud.example");

        let (updated_recent,): (bool,) = sqlx::query_as(
            "SELECT updated_at > NOW() - INTERVAL '1 hour' FROM account_activities WHERE cache_key = 'k'",
        )
        .fetch_one(&pool)
        .await?;
        assert!(updated_recent);
        Ok(())
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_set_failed_to_refresh_on_missing_row(pool: PgPool) -> Result<(), TokenCacheError> {
        let repo = AccountActivityRepository::new(pool);

        assert!(!repo.set_failed_to_refresh(&CacheKey::new("missing"), true).await?);
        assert!(repo.get_accounts_to_refresh().await?.is_empty());
        Ok(())
    }

    #[tokio::test]
    async fn test_mock_set_failed_to_refresh() {
        let mut reissued = activity("a", "alice");
        reissued.username = "alice-reissued@example.com".to_string();
        let repo = MockAccountActivityRepository::with_activities(vec![reissued.clone()]);

        assert!(repo.set_failed_to_refresh(&CacheKey::new("a"), true).await.unwrap());
        assert!(!repo.set_failed_to_refresh(&CacheKey::new("b"), true).await.unwrap());

        let row = repo.get_activity(&CacheKey::new("a")).await.unwrap().unwrap();
        assert!(row.failed_to_refresh);
        assert_eq!(row.username, reissued.username);
        assert_eq!(repo.flag_update_count(), 1);
        assert_eq!(repo.upsert_count(), 0);
    }

    #[tokio::test]
    async fn test_mock_upsert_and_ordering() {
        let repo = MockAccountActivityRepository::new();
        repo.upsert_activity(&activity("b", "bob")).await.unwrap();
        repo.upsert_activity(&activity("a", "alice")).await.unwrap();
        repo.upsert_activity(&activity("a", "alice")).await.unwrap();

        let rows = repo.get_accounts_to_refresh().await.unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows.first().map(|r| r.cache_key.as_str()), Some("a"));
        assert_eq!(repo.upsert_count(), 3);
    }

    #[tokio::test]
    async fn test_mock_failure_toggles() {
        let repo = MockAccountActivityRepository::with_activities(vec![activity("a", "alice")]);

        repo.set_fail_reads(true);
        assert!(repo.get_accounts_to_refresh().await.is_err());
        repo.set_fail_reads(false);
        assert_eq!(repo.get_accounts_to_refresh().await.unwrap().len(), 1);

        repo.set_fail_writes(true);
        let result = repo.upsert_activity(&activity("b", "bob")).await;
        assert!(matches!(result, Err(TokenCacheError::Database(_))));
        assert_eq!(repo.upsert_count(), 0);
    }
}
