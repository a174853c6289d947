//! Postgres-backed byte store with sliding expiration.
//!
//! Rows live in the `token_cache` table. Each row carries its own sliding
//! window: a successful read pushes `expires_at_time` forward by that window,
//! and rows past their expiry read as absent until the maintenance task
//! deletes them.
//!
//! # Security
//!
//! - All queries use parameterized statements
//! - Keys and values are never logged

use super::ByteStore;
use crate::errors::TokenCacheError;
use crate::observability::metrics::{record_db_query, status_label};
use async_trait::async_trait;
use sqlx::PgPool;
use std::time::{Duration, Instant};
use tracing::{debug, instrument};

/// Default sliding expiration for cache entries (20 minutes).
pub const DEFAULT_SLIDING_EXPIRATION: Duration = Duration::from_secs(20 * 60);

const TABLE: &str = "token_cache";

/// Tunables for [`PgByteStore`].
#[derive(Debug, Clone)]
pub struct PgByteStoreOptions {
    /// How long an entry survives without being read or written.
    pub sliding_expiration: Duration,
}

impl Default for PgByteStoreOptions {
    fn default() -> Self {
        Self {
            sliding_expiration: DEFAULT_SLIDING_EXPIRATION,
        }
    }
}

/// Byte store over the `token_cache` table.
#[derive(Clone)]
pub struct PgByteStore {
    pool: PgPool,
    sliding_expiration_secs: i64,
}

impl PgByteStore {
    #[must_use]
    pub fn new(pool: PgPool, options: PgByteStoreOptions) -> Self {
        let sliding_expiration_secs =
            i64::try_from(options.sliding_expiration.as_secs()).unwrap_or(i64::MAX);
        Self {
            pool,
            sliding_expiration_secs,
        }
    }

    /// Delete every expired entry.
    ///
    /// Returns the number of rows removed.
    ///
    /// # Errors
    ///
    /// Returns `TokenCacheError::Database` if the delete fails.
    #[instrument(skip_all)]
    pub async fn delete_expired(&self) -> Result<u64, TokenCacheError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            DELETE FROM token_cache
            WHERE expires_at_time <= NOW()
            "#,
        )
        .execute(&self.pool)
        .await;
        record_db_query("delete", TABLE, status_label(&result), start.elapsed());

        let deleted = result?.rows_affected();
        debug!(target: "tc.store.postgres", deleted = deleted, "Deleted expired cache entries");
        Ok(deleted)
    }
}

#[async_trait]
impl ByteStore for PgByteStore {
    #[instrument(skip_all)]
    async fn get(&self, key: &str) -> Result<Option<Vec<u8>>, TokenCacheError> {
        let start = Instant::now();
        // Reading an entry refreshes its sliding window.
        let result: Result<Option<(Vec<u8>,)>, sqlx::Error> = sqlx::query_as(
            r#"
            UPDATE token_cache
            SET expires_at_time = NOW() + (sliding_expiration_seconds::double precision * INTERVAL '1 second')
            WHERE id = $1
              AND expires_at_time > NOW()
            RETURNING value
            "#,
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await;
        record_db_query("select", TABLE, status_label(&result), start.elapsed());

        Ok(result?.map(|(value,)| value))
    }

    #[instrument(skip_all)]
    async fn set(&self, key: &str, value: &[u8]) -> Result<(), TokenCacheError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            INSERT INTO token_cache (id, value, expires_at_time, sliding_expiration_seconds)
            VALUES ($1, $2, NOW() + ($3::double precision * INTERVAL '1 second'), $3)
            ON CONFLICT (id) DO UPDATE
            SET value = EXCLUDED.value,
                expires_at_time = EXCLUDED.expires_at_time,
                sliding_expiration_seconds = EXCLUDED.sliding_expiration_seconds
            "#,
        )
        .bind(key)
        .bind(value)
        .bind(self.sliding_expiration_secs)
        .execute(&self.pool)
        .await;
        record_db_query("upsert", TABLE, status_label(&result), start.elapsed());

        result?;
        Ok(())
    }

    #[instrument(skip_all)]
    async fn remove(&self, key: &str) -> Result<(), TokenCacheError> {
        let start = Instant::now();
        let result = sqlx::query(
            r#"
            DELETE FROM token_cache
            WHERE id = $1
            "#,
        )
        .bind(key)
        .execute(&self.pool)
        .await;
        record_db_query("delete", TABLE, status_label(&result), start.elapsed());

        result?;
        Ok(())
    }
}
