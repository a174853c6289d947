//! Database pool configuration.
//!
//! The token cache and the account activity table live in the same Postgres
//! database. Every pool is created with a server-side `statement_timeout` so
//! a hung query cannot stall the refresh loop indefinitely.

use crate::secret::{ExposeSecret, SecretString};
use sqlx::postgres::{PgPool, PgPoolOptions};
use std::time::Duration;
use tracing::info;

/// Default maximum pool size.
pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;

/// Default statement timeout applied through the connection URL.
pub const DEFAULT_STATEMENT_TIMEOUT_SECS: u32 = 5;

/// Postgres pool settings.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Connection URL (may contain a password).
    pub url: SecretString,
    /// Maximum number of pooled connections.
    pub max_connections: u32,
    /// Connections kept open while idle.
    pub min_connections: u32,
    /// How long to wait for a free connection.
    pub acquire_timeout: Duration,
    /// Server-side statement timeout in seconds.
    pub statement_timeout_secs: u32,
}

impl DatabaseConfig {
    /// Create a configuration with default pool sizing.
    #[must_use]
    pub fn new(url: SecretString) -> Self {
        Self {
            url,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: 1,
            acquire_timeout: Duration::from_secs(5),
            statement_timeout_secs: DEFAULT_STATEMENT_TIMEOUT_SECS,
        }
    }
}

/// Connect a Postgres pool using the given settings.
///
/// # Errors
///
/// Returns the underlying `sqlx::Error` if no connection can be established.
pub async fn connect(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    let url = add_query_timeout(config.url.expose_secret(), config.statement_timeout_secs);

    let pool = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(config.acquire_timeout)
        .idle_timeout(Duration::from_secs(600))
        .max_lifetime(Duration::from_secs(1800))
        .connect(&url)
        .await?;

    info!(
        target: "common.database",
        max_connections = config.max_connections,
        statement_timeout_secs = config.statement_timeout_secs,
        "Database pool connected"
    );

    Ok(pool)
}

/// Adds `statement_timeout` to the database URL.
#[must_use]
pub fn add_query_timeout(url: &str, timeout_secs: u32) -> String {
    let separator = if url.contains('?') { '&' } else { '?' };
    format!("{url}{separator}options=-c%20statement_timeout%3D{timeout_secs}s")
}
