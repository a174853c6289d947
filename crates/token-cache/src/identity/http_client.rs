//! Refresh-token grant adapter for the identity client boundary.
//!
//! A deliberately thin confidential client: it redeems cached refresh tokens
//! at the authority's token endpoint and keeps the results in an
//! [`InMemoryTokenCache`]. It does not discover authority metadata, validate
//! JWTs, or run any interactive flow; accounts only get into the cache through
//! a web front end that shares the same cache format.
//!
//! # Security
//!
//! - Client secret is held as `SecretString` and never logged
//! - Token endpoint error bodies are logged at trace level only
//! - HTTP timeouts prevent a hung identity provider from stalling the caller

use super::token_cache::{CachedAccessToken, CachedRefreshToken, InMemoryTokenCache};
use super::{Account, AuthenticationResult, ConfidentialClient, ConfidentialClientFactory, TokenCache};
use crate::errors::TokenCacheError;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use common::secret::{ExposeSecret, SecretString};
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, trace, warn};

/// Token endpoint path relative to the authority (v2 endpoint layout).
pub const TOKEN_ENDPOINT_PATH: &str = "/oauth2/v2.0/token";

/// Default HTTP request timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Default connection timeout for HTTP client.
const DEFAULT_CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Cached access tokens closer than this to expiry are refreshed.
const ACCESS_TOKEN_EXPIRY_MARGIN_SECS: i64 = 300;

/// Error codes that mean the user has to sign in again.
const INTERACTION_REQUIRED_ERRORS: &[&str] = &[
    "invalid_grant",
    "interaction_required",
    "login_required",
    "consent_required",
];

/// Settings shared by every client a factory builds.
#[derive(Clone)]
pub struct HttpClientOptions {
    pub client_id: String,
    pub client_secret: SecretString,
    /// Authority URL, e.g. `https://login.microsoftonline.com/{tenant}`.
    pub authority: String,
    pub http_timeout: Duration,
}

impl std::fmt::Debug for HttpClientOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpClientOptions")
            .field("client_id", &self.client_id)
            .field("client_secret", &"[REDACTED]")
            .field("authority", &self.authority)
            .field("http_timeout", &self.http_timeout)
            .finish()
    }
}

impl HttpClientOptions {
    #[must_use]
    pub fn new(client_id: String, client_secret: SecretString, authority: String) -> Self {
        Self {
            client_id,
            client_secret,
            authority,
            http_timeout: DEFAULT_HTTP_TIMEOUT,
        }
    }

    #[must_use]
    pub fn with_http_timeout(mut self, timeout: Duration) -> Self {
        self.http_timeout = timeout;
        self
    }

    /// Full token endpoint URL.
    #[must_use]
    pub fn token_endpoint(&self) -> String {
        format!("{}{}", self.authority.trim_end_matches('/'), TOKEN_ENDPOINT_PATH)
    }
}

/// Successful token endpoint response.
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
    #[serde(default)]
    refresh_token: Option<String>,
}

impl std::fmt::Debug for TokenResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenResponse")
            .field("access_token", &"[REDACTED]")
            .field("expires_in", &self.expires_in)
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

/// OAuth error response body.
#[derive(Debug, Deserialize)]
struct TokenErrorResponse {
    error: String,
    #[serde(default)]
    suberror: Option<String>,
}

/// Confidential client that redeems refresh tokens over HTTP.
pub struct HttpConfidentialClient {
    options: Arc<HttpClientOptions>,
    http: reqwest::Client,
    cache: InMemoryTokenCache,
}

impl HttpConfidentialClient {
    #[must_use]
    pub fn new(options: Arc<HttpClientOptions>, http: reqwest::Client) -> Self {
        Self {
            options,
            http,
            cache: InMemoryTokenCache::new(),
        }
    }

    /// Concrete cache, for callers that need more than the [`TokenCache`] surface.
    #[must_use]
    pub fn token_cache(&self) -> &InMemoryTokenCache {
        &self.cache
    }

    /// Resolve a token from the loaded cache, redeeming the refresh token if
    /// needed. Returns the result and whether the cache was modified.
    async fn acquire_from_cache(
        &self,
        scopes: &[String],
        account: &Account,
    ) -> Result<(AuthenticationResult, bool), TokenCacheError> {
        let home = &account.home_account_id.identifier;

        if let Some(cached) = self.cache.access_token(home, scopes)? {
            let remaining = cached.expires_on - Utc::now();
            if remaining > ChronoDuration::seconds(ACCESS_TOKEN_EXPIRY_MARGIN_SECS) {
                debug!(
                    target: "tc.identity.http",
                    expires_on = %cached.expires_on,
                    "Cached access token still valid"
                );
                return Ok((
                    AuthenticationResult {
                        access_token: SecretString::from(cached.secret),
                        expires_on: cached.expires_on,
                        scopes: cached.scopes,
                        account: account.clone(),
                    },
                    false,
                ));
            }
        }

        let Some(refresh_token) = self.cache.refresh_token(home)? else {
            return Err(TokenCacheError::InteractionRequired(
                "no refresh token cached for account".into(),
            ));
        };

        let response = self.redeem_refresh_token(&refresh_token.secret, scopes).await?;

        let expires_on = i64::try_from(response.expires_in)
            .ok()
            .and_then(ChronoDuration::try_seconds)
            .and_then(|lifetime| Utc::now().checked_add_signed(lifetime))
            .ok_or_else(|| {
                TokenCacheError::Identity(format!(
                    "invalid expires_in in token response: {}",
                    response.expires_in
                ))
            })?;

        self.cache.notify_before_write().await?;

        let access_token = response.access_token;

        self.cache.save_tokens(
            account,
            CachedAccessToken {
                home_account_id: home.clone(),
                scopes: scopes.to_vec(),
                secret: access_token.clone(),
                expires_on,
            },
            response.refresh_token.map(|secret| CachedRefreshToken {
                home_account_id: home.clone(),
                client_id: self.options.client_id.clone(),
                secret,
            }),
        )?;

        Ok((
            AuthenticationResult {
                access_token: SecretString::from(access_token),
                expires_on,
                scopes: scopes.to_vec(),
                account: account.clone(),
            },
            true,
        ))
    }

    /// POST a `refresh_token` grant to the token endpoint.
    #[instrument(skip_all)]
    async fn redeem_refresh_token(
        &self,
        refresh_token: &str,
        scopes: &[String],
    ) -> Result<TokenResponse, TokenCacheError> {
        let url = self.options.token_endpoint();
        let mut scope = scopes.join(" ");
        if !scopes.iter().any(|s| s == "offline_access") {
            scope.push_str(" offline_access");
        }

        let form_body = [
            ("grant_type", "refresh_token"),
            ("client_id", self.options.client_id.as_str()),
            ("client_secret", self.options.client_secret.expose_secret()),
            ("refresh_token", refresh_token),
            ("scope", scope.trim()),
        ];

        let response = self
            .http
            .post(&url)
            .form(&form_body)
            .send()
            .await
            .map_err(|e| {
                warn!(target: "tc.identity.http", error = %e, "Token endpoint request failed");
                TokenCacheError::Identity(format!("token endpoint unreachable: {e}"))
            })?;

        let status = response.status();

        if status.is_success() {
            return response.json::<TokenResponse>().await.map_err(|e| {
                warn!(target: "tc.identity.http", error = %e, "Failed to parse token response");
                TokenCacheError::Identity(format!("invalid token response: {e}"))
            });
        }

        let body = response.text().await.unwrap_or_default();
        trace!(target: "tc.identity.http", body = %body, "Token endpoint error body");

        if status.as_u16() == 400 || status.as_u16() == 401 {
            let parsed: Option<TokenErrorResponse> = serde_json::from_str(&body).ok();
            let error = parsed
                .as_ref()
                .map_or("unknown_error", |p| p.error.as_str());

            if INTERACTION_REQUIRED_ERRORS.contains(&error) {
                let suberror = parsed.as_ref().and_then(|p| p.suberror.clone());
                debug!(
                    target: "tc.identity.http",
                    error = %error,
                    suberror = ?suberror,
                    "Token endpoint requires user interaction"
                );
                return Err(TokenCacheError::InteractionRequired(error.to_string()));
            }

            warn!(target: "tc.identity.http", status = %status, error = %error, "Token request rejected");
            return Err(TokenCacheError::Identity(format!(
                "token request rejected: {error}"
            )));
        }

        warn!(target: "tc.identity.http", status = %status, "Unexpected token endpoint response");
        Err(TokenCacheError::Identity(format!(
            "unexpected token endpoint status: {status}"
        )))
    }
}

#[async_trait]
impl ConfidentialClient for HttpConfidentialClient {
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

        let outcome = self.acquire_from_cache(scopes, account).await;
        let has_state_changed = matches!(outcome, Ok((_, true)));

        self.cache.notify_after_access(has_state_changed).await?;

        outcome.map(|(result, _)| result)
    }
}

/// Builds [`HttpConfidentialClient`]s sharing one connection pool.
pub struct HttpClientFactory {
    options: Arc<HttpClientOptions>,
    http: reqwest::Client,
}

impl HttpClientFactory {
    /// # Errors
    ///
    /// Returns `TokenCacheError::Configuration` if the HTTP client cannot be built.
    pub fn new(options: HttpClientOptions) -> Result<Self, TokenCacheError> {
        let http = reqwest::Client::builder()
            .timeout(options.http_timeout)
            .connect_timeout(DEFAULT_CONNECT_TIMEOUT)
            .build()
            .map_err(|e| {
                TokenCacheError::Configuration(format!("Failed to build HTTP client: {e}"))
            })?;

        Ok(Self {
            options: Arc::new(options),
            http,
        })
    }
}

impl ConfidentialClientFactory for HttpClientFactory {
    fn build(&self) -> Result<Box<dyn ConfidentialClient>, TokenCacheError> {
        Ok(Box::new(HttpConfidentialClient::new(
            Arc::clone(&self.options),
            self.http.clone(),
        )))
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::identity::{HomeAccountId, TokenCacheHooks, TokenCacheNotification};
    use std::sync::Mutex;
    use wiremock::matchers::{body_string_contains, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[derive(Default)]
    struct RecordingHooks {
        events: Mutex<Vec<String>>,
    }

    impl RecordingHooks {
        fn events(&self) -> Vec<String> {
            self.events.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl TokenCacheHooks for RecordingHooks {
        async fn before_access(
            &self,
            _args: &TokenCacheNotification<'_>,
        ) -> Result<(), TokenCacheError> {
            self.events.lock().unwrap().push("before_access".into());
            Ok(())
        }

        async fn after_access(
            &self,
            args: &TokenCacheNotification<'_>,
        ) -> Result<(), TokenCacheError> {
            self.events
                .lock()
                .unwrap()
                .push(format!("after_access:{}", args.has_state_changed));
            Ok(())
        }

        async fn before_write(
            &self,
            _args: &TokenCacheNotification<'_>,
        ) -> Result<(), TokenCacheError> {
            self.events.lock().unwrap().push("before_write".into());
            Ok(())
        }
    }

    fn account() -> Account {
        Account {
            home_account_id: HomeAccountId::new(
                "oid.tid".to_string(),
                "oid".to_string(),
                "tid".to_string(),
            ),
            environment: "login.example.com".to_string(),
            username: "alice@example.com".to_string(),
        }
    }

    fn scopes() -> Vec<String> {
        vec!["User.Read".to_string()]
    }

    fn client_for(server: &MockServer) -> (HttpConfidentialClient, Arc<RecordingHooks>) {
        let options = HttpClientOptions::new(
            "daemon-client".to_string(),
            SecretString::from("daemon-secret"),
            format!("{}/tenant-id", server.uri()),
        );
        let factory_http = reqwest::Client::new();
        let client = HttpConfidentialClient::new(Arc::new(options), factory_http);
        let hooks = Arc::new(RecordingHooks::default());
        client.user_token_cache().set_hooks(hooks.clone());
        (client, hooks)
    }

    fn seed(client: &HttpConfidentialClient, access_expires_in: i64) {
        let account = account();
        client
            .token_cache()
            .save_tokens(
                &account,
                CachedAccessToken {
                    home_account_id: "oid.tid".to_string(),
                    scopes: scopes(),
                    secret: "old-access".to_string(),
                    expires_on: Utc::now() + ChronoDuration::seconds(access_expires_in),
                },
                Some(CachedRefreshToken {
                    home_account_id: "oid.tid".to_string(),
                    client_id: "daemon-client".to_string(),
                    secret: "old-refresh".to_string(),
                }),
            )
            .unwrap();
    }

    #[test]
    fn test_token_endpoint_url() {
        let options = HttpClientOptions::new(
            "c".to_string(),
            SecretString::from("s"),
            "https://login.example.com/tenant/".to_string(),
        );
        assert_eq!(
            options.token_endpoint(),
            "https://login.example.com/tenant/oauth2/v2.0/token"
        );
    }

    #[test]
    fn test_options_debug_redacts_secret() {
        let options = HttpClientOptions::new(
            "c".to_string(),
            SecretString::from("super-secret-value"),
            "https://login.example.com/tenant".to_string(),
        );
        let debug = format!("{options:?}");
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("super-secret-value"));
    }

    #[tokio::test]
    async fn test_silent_refresh_redeems_refresh_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-id/oauth2/v2.0/token"))
            .and(body_string_contains("grant_type=refresh_token"))
            .and(body_string_contains("refresh_token=old-refresh"))
            .and(body_string_contains("client_id=daemon-client"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": 3600
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, hooks) = client_for(&server);
        seed(&client, 10);

        let result = client
            .acquire_token_silent(&scopes(), &account())
            .await
            .unwrap();

        assert_eq!(result.access_token.expose_secret(), "new-access");
        let rt = client.token_cache().refresh_token("oid.tid").unwrap().unwrap();
        assert_eq!(rt.secret, "new-refresh");
        assert_eq!(
            hooks.events(),
            vec!["before_access", "before_write", "after_access:true"]
        );
    }

    #[tokio::test]
    async fn test_out_of_range_expires_in_is_identity_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-id/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "token_type": "Bearer",
                "access_token": "new-access",
                "refresh_token": "new-refresh",
                "expires_in": 10_000_000_000_000_u64
            })))
            .expect(1)
            .mount(&server)
            .await;

        let (client, hooks) = client_for(&server);
        seed(&client, 10);

        let result = client.acquire_token_silent(&scopes(), &account()).await;

        assert!(matches!(result, Err(TokenCacheError::Identity(_))));
        let rt = client.token_cache().refresh_token("oid.tid").unwrap().unwrap();
        assert_eq!(rt.secret, "old-refresh", "Cache is left untouched");
        assert_eq!(hooks.events(), vec!["before_access", "after_access:false"]);
    }

    #[tokio::test]
    async fn test_valid_cached_access_token_skips_network() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .expect(0)
            .mount(&server)
            .await;

        let (client, hooks) = client_for(&server);
        seed(&client, 3600);

        let result = client
            .acquire_token_silent(&scopes(), &account())
            .await
            .unwrap();

        assert_eq!(result.access_token.expose_secret(), "old-access");
        assert_eq!(hooks.events(), vec!["before_access", "after_access:false"]);
    }

    #[tokio::test]
    async fn test_missing_refresh_token_requires_interaction() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200))
            .expect(0)
            .mount(&server)
            .await;

        let (client, hooks) = client_for(&server);

        let result = client.acquire_token_silent(&scopes(), &account()).await;

        assert!(matches!(result, Err(TokenCacheError::InteractionRequired(_))));
        assert_eq!(hooks.events(), vec!["before_access", "after_access:false"]);
    }

    #[tokio::test]
    async fn test_invalid_grant_maps_to_interaction_required() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tenant-id/oauth2/v2.0/token"))
            .respond_with(ResponseTemplate::new(400).set_body_json(serde_json::json!({
                "error": "invalid_grant",
                "error_description": "AADSTS700082: The refresh token has expired",
                "suberror": "bad_token"
            })))
            .mount(&server)
            .await;

        let (client, _hooks) = client_for(&server);
        seed(&client, 0);

        let result = client.acquire_token_silent(&scopes(), &account()).await;

        assert!(
            matches!(&result, Err(TokenCacheError::InteractionRequired(code)) if code == "invalid_grant"),
            "expected InteractionRequired(invalid_grant), got {result:?}"
        );
    }

    #[tokio::test]
    async fn test_invalid_client_is_identity_error() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(401).set_body_json(serde_json::json!({
                "error": "invalid_client"
            })))
            .mount(&server)
            .await;

        let (client, _hooks) = client_for(&server);
        seed(&client, 0);

        let result = client.acquire_token_silent(&scopes(), &account()).await;
        assert!(matches!(result, Err(TokenCacheError::Identity(_))));
    }

    #[tokio::test]
    async fn test_server_error_is_identity_error_and_cache_unchanged() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let (client, hooks) = client_for(&server);
        seed(&client, 0);
        let before = client.token_cache().snapshot().unwrap();

        let result = client.acquire_token_silent(&scopes(), &account()).await;

        assert!(matches!(result, Err(TokenCacheError::Identity(_))));
        assert_eq!(client.token_cache().snapshot().unwrap(), before);
        assert_eq!(hooks.events(), vec!["before_access", "after_access:false"]);
    }

    #[tokio::test]
    async fn test_get_accounts_fires_access_hooks() {
        let server = MockServer::start().await;
        let (client, hooks) = client_for(&server);
        seed(&client, 3600);

        let accounts = client.get_accounts().await.unwrap();

        assert_eq!(accounts, vec![account()]);
        assert_eq!(hooks.events(), vec!["before_access", "after_access:false"]);
    }

    #[test]
    fn test_factory_builds_independent_clients() {
        let factory = HttpClientFactory::new(HttpClientOptions::new(
            "c".to_string(),
            SecretString::from("s"),
            "https://login.example.com/tenant".to_string(),
        ))
        .unwrap();

        assert!(factory.build().is_ok());
        assert!(factory.build().is_ok());
    }
}
