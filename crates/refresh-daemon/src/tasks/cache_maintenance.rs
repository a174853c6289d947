//! Expired cache entry cleanup.
//!
//! Expired `token_cache` rows already read as absent; this task only keeps
//! the table from growing with entries nobody will read again.
//!
//! # Graceful Shutdown
//!
//! The task exits when the cancellation token is triggered.

use crate::observability::metrics::record_expired_deleted;
use std::time::Duration;
use token_cache::store::PgByteStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// Start the cache maintenance background task.
#[instrument(skip_all, name = "daemon.task.cache_maintenance")]
pub async fn start_cache_maintenance(
    store: PgByteStore,
    interval: Duration,
    cancel_token: CancellationToken,
) {
    info!(
        target: "daemon.task.cache_maintenance",
        interval_seconds = interval.as_secs(),
        "Starting cache maintenance task"
    );

    let mut ticker = tokio::time::interval(interval);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                run_maintenance(&store).await;
            }
            () = cancel_token.cancelled() => {
                info!(
                    target: "daemon.task.cache_maintenance",
                    "Cache maintenance task received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "daemon.task.cache_maintenance", "Cache maintenance task stopped");
}

/// Run a single sweep. Errors are logged; the next tick retries.
///
/// Returns the number of rows deleted.
pub(crate) async fn run_maintenance(store: &PgByteStore) -> u64 {
    match store.delete_expired().await {
        Ok(deleted) => {
            record_expired_deleted(deleted);
            if deleted > 0 {
                info!(
                    target: "daemon.task.cache_maintenance",
                    deleted = deleted,
                    "Deleted expired token cache entries"
                );
            } else {
                debug!(target: "daemon.task.cache_maintenance", "No expired entries");
            }
            deleted
        }
        Err(e) => {
            warn!(
                target: "daemon.task.cache_maintenance",
                error = %e,
                "Failed to delete expired cache entries"
            );
            0
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use sqlx::PgPool;
    use token_cache::store::{ByteStore, PgByteStoreOptions};

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_run_maintenance_deletes_expired_rows(pool: PgPool) {
        let store = PgByteStore::new(pool.clone(), PgByteStoreOptions::default());
        store.set("stale", b"old").await.unwrap();
        store.set("fresh", b"new").await.unwrap();
        sqlx::query(
            "UPDATE token_cache SET expires_at_time = NOW() - INTERVAL '1 minute' WHERE id = 'stale'",
        )
        .execute(&pool)
        .await
        .unwrap();

        assert_eq!(run_maintenance(&store).await, 1);
        assert_eq!(run_maintenance(&store).await, 0);
        assert_eq!(store.get("fresh").await.unwrap(), Some(b"new".to_vec()));
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_run_maintenance_survives_database_errors(pool: PgPool) {
        let store = PgByteStore::new(pool.clone(), PgByteStoreOptions::default());
        pool.close().await;

        assert_eq!(run_maintenance(&store).await, 0);
    }

    #[sqlx::test(migrations = "../../migrations")]
    async fn test_task_exits_on_cancellation(pool: PgPool) {
        let store = PgByteStore::new(pool, PgByteStoreOptions::default());
        let cancel = CancellationToken::new();

        let handle = tokio::spawn(start_cache_maintenance(
            store,
            Duration::from_secs(3600),
            cancel.clone(),
        ));
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .expect("task exits after cancellation")
            .unwrap();
    }
}
