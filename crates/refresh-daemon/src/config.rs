//! Refresh daemon configuration.
//!
//! Configuration is loaded from environment variables. The database URL and
//! the client secret are held as `SecretString` and redacted in Debug output.

use common::secret::SecretString;
use std::collections::HashMap;
use std::env;
use std::fmt;
use thiserror::Error;

/// Default scope requested for every refreshed account.
pub const DEFAULT_REFRESH_SCOPE: &str = "User.Read";

/// Default interval between refresh cycles (10 minutes).
pub const DEFAULT_REFRESH_INTERVAL_SECONDS: u64 = 600;

/// Default threshold for consecutive failures before giving up.
pub const DEFAULT_MAX_CONSECUTIVE_FAILURES: u32 = 5;

/// Default sliding expiration for stored caches (20 minutes).
pub const DEFAULT_CACHE_SLIDING_EXPIRATION_SECONDS: u64 = 1200;

/// Default interval between expired-entry sweeps (30 minutes).
pub const DEFAULT_CACHE_CLEANUP_INTERVAL_SECONDS: u64 = 1800;

/// Default identity provider request timeout.
pub const DEFAULT_HTTP_TIMEOUT_SECONDS: u64 = 10;

/// Default bind address for health and metrics endpoints.
pub const DEFAULT_HEALTH_BIND_ADDRESS: &str = "0.0.0.0:8081";

/// Default daemon ID prefix.
pub const DEFAULT_DAEMON_ID_PREFIX: &str = "refresh-daemon";

/// Refresh daemon configuration.
#[derive(Clone)]
pub struct Config {
    /// PostgreSQL connection URL.
    pub database_url: SecretString,

    /// Confidential client application ID.
    pub client_id: String,

    /// Confidential client secret.
    pub client_secret: SecretString,

    /// Authority URL, e.g. `https://login.microsoftonline.com/{tenant}`.
    pub authority: String,

    /// Scopes requested on every silent refresh.
    pub refresh_scopes: Vec<String>,

    pub refresh_interval_seconds: u64,

    /// Consecutive store failures within a cycle, and consecutive failed
    /// cycles, tolerated before the daemon gives up.
    pub max_consecutive_failures: u32,

    pub cache_sliding_expiration_seconds: u64,

    pub cache_cleanup_interval_seconds: u64,

    pub http_timeout_seconds: u64,

    /// Health/metrics server bind address (default: "0.0.0.0:8081").
    pub health_bind_address: String,

    /// Unique identifier for this daemon instance, used in logs.
    pub daemon_id: String,
}

/// Custom Debug implementation that redacts sensitive fields.
impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &"[REDACTED]")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("authority", &self.authority)
            .field("refresh_scopes", &self.refresh_scopes)
            .field("refresh_interval_seconds", &self.refresh_interval_seconds)
            .field("max_consecutive_failures", &self.max_consecutive_failures)
            .field(
                "cache_sliding_expiration_seconds",
                &self.cache_sliding_expiration_seconds,
            )
            .field(
                "cache_cleanup_interval_seconds",
                &self.cache_cleanup_interval_seconds,
            )
            .field("http_timeout_seconds", &self.http_timeout_seconds)
            .field("health_bind_address", &self.health_bind_address)
            .field("daemon_id", &self.daemon_id)
            .finish()
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid authority: {0}")]
    InvalidAuthority(String),

    #[error("Invalid refresh scopes: {0}")]
    InvalidScopes(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value is invalid.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env::vars().collect())
    }

    /// Load configuration from a `HashMap` (for testing).
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if a required variable is missing or a value is invalid.
    pub fn from_vars(vars: &HashMap<String, String>) -> Result<Self, ConfigError> {
        let database_url = SecretString::from(required(vars, "DATABASE_URL")?);
        let client_id = required(vars, "CLIENT_ID")?;
        let client_secret = SecretString::from(required(vars, "CLIENT_SECRET")?);

        let authority = required(vars, "AUTHORITY")?;
        validate_authority(&authority)?;

        let refresh_scopes = match vars.get("REFRESH_SCOPES") {
            Some(value) => parse_scopes(value)?,
            None => vec![DEFAULT_REFRESH_SCOPE.to_string()],
        };

        let refresh_interval_seconds = parse_positive(
            vars,
            "REFRESH_INTERVAL_SECONDS",
            DEFAULT_REFRESH_INTERVAL_SECONDS,
        )?;

        let max_consecutive_failures = parse_positive(
            vars,
            "MAX_CONSECUTIVE_FAILURES",
            DEFAULT_MAX_CONSECUTIVE_FAILURES,
        )?;

        let cache_sliding_expiration_seconds = parse_positive(
            vars,
            "CACHE_SLIDING_EXPIRATION_SECONDS",
            DEFAULT_CACHE_SLIDING_EXPIRATION_SECONDS,
        )?;

        let cache_cleanup_interval_seconds = parse_positive(
            vars,
            "CACHE_CLEANUP_INTERVAL_SECONDS",
            DEFAULT_CACHE_CLEANUP_INTERVAL_SECONDS,
        )?;

        let http_timeout_seconds =
            parse_positive(vars, "HTTP_TIMEOUT_SECONDS", DEFAULT_HTTP_TIMEOUT_SECONDS)?;

        let health_bind_address = vars
            .get("HEALTH_BIND_ADDRESS")
            .cloned()
            .unwrap_or_else(|| DEFAULT_HEALTH_BIND_ADDRESS.to_string());

        let daemon_id = vars.get("DAEMON_ID").cloned().unwrap_or_else(|| {
            let hostname = env::var("HOSTNAME").unwrap_or_else(|_| "unknown".to_string());
            // Use first 8 chars of UUID for uniqueness
            let uuid_suffix = uuid::Uuid::new_v4().to_string();
            let short_suffix = uuid_suffix.get(..8).unwrap_or("00000000");
            format!("{DEFAULT_DAEMON_ID_PREFIX}-{hostname}-{short_suffix}")
        });

        Ok(Config {
            database_url,
            client_id,
            client_secret,
            authority,
            refresh_scopes,
            refresh_interval_seconds,
            max_consecutive_failures,
            cache_sliding_expiration_seconds,
            cache_cleanup_interval_seconds,
            http_timeout_seconds,
            health_bind_address,
            daemon_id,
        })
    }
}

fn required(vars: &HashMap<String, String>, name: &str) -> Result<String, ConfigError> {
    vars.get(name)
        .filter(|value| !value.trim().is_empty())
        .cloned()
        .ok_or_else(|| ConfigError::MissingEnvVar(name.to_string()))
}

fn parse_positive<T>(vars: &HashMap<String, String>, name: &str, default: T) -> Result<T, ConfigError>
where
    T: std::str::FromStr + PartialOrd + Default,
    T::Err: fmt::Display,
{
    let Some(value_str) = vars.get(name) else {
        return Ok(default);
    };

    let value: T = value_str.trim().parse().map_err(|e| {
        ConfigError::InvalidValue(format!(
            "{name} must be a valid positive integer, got '{value_str}': {e}"
        ))
    })?;

    if value <= T::default() {
        return Err(ConfigError::InvalidValue(format!(
            "{name} must be greater than 0"
        )));
    }

    Ok(value)
}

/// Require HTTPS, except for local development authorities.
fn validate_authority(authority: &str) -> Result<(), ConfigError> {
    if authority.starts_with("https://") {
        return Ok(());
    }

    let local = ["http://localhost", "http://127.0.0.1"]
        .iter()
        .any(|prefix| authority.starts_with(prefix));
    if local {
        return Ok(());
    }

    Err(ConfigError::InvalidAuthority(format!(
        "AUTHORITY must use https:// (http:// is only allowed for localhost), got '{authority}'"
    )))
}

/// Split a space- or comma-separated scope list.
fn parse_scopes(value: &str) -> Result<Vec<String>, ConfigError> {
    let scopes: Vec<String> = value
        .split(|c: char| c == ',' || c.is_whitespace())
        .filter(|s| !s.is_empty())
        .map(ToString::to_string)
        .collect();

    if scopes.is_empty() {
        return Err(ConfigError::InvalidScopes(
            "REFRESH_SCOPES must contain at least one scope".to_string(),
        ));
    }

    Ok(scopes)
}
