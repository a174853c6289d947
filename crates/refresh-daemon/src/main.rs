//! Token Refresh Daemon
//!
//! Periodically refreshes the token caches of every account the web front
//! ends have recorded, so downstream APIs can be called on a user's behalf
//! while they are away.
//!
//! # Startup Sequence
//!
//! 1. Load configuration from environment
//! 2. Initialize Prometheus metrics recorder
//! 3. Connect to the token cache database
//! 4. Build the cache store, activity repository and identity client factory
//! 5. Start health server (`/health`, `/ready`, `/metrics`)
//! 6. Spawn cache maintenance and the refresh loop
//! 7. Wait for a shutdown signal or a fatal refresh loop error
//!
//! # Exit Status
//!
//! The process exits non-zero when the refresh loop gives up after repeated
//! failed cycles, so the supervisor can restart it.

#![warn(clippy::pedantic)]

use common::database::{connect, DatabaseConfig};
use common::secret::redact_url_password;
use common::secret::ExposeSecret;
use metrics_exporter_prometheus::PrometheusBuilder;
use refresh_daemon::config::Config;
use refresh_daemon::observability::health::metrics_router;
use refresh_daemon::observability::{health_router, HealthState};
use refresh_daemon::runner::{RefreshRunner, RefreshRunnerConfig};
use refresh_daemon::tasks::{start_cache_maintenance, start_refresh_loop, RefreshLoopConfig};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use token_cache::identity::http_client::{HttpClientFactory, HttpClientOptions};
use token_cache::provider::TokenCacheProviderFactory;
use token_cache::repositories::AccountActivityRepository;
use token_cache::store::{PgByteStore, PgByteStoreOptions};
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
#[allow(clippy::too_many_lines)]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "refresh_daemon=info,token_cache=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Token Refresh Daemon");

    // Load configuration
    let config = Config::from_env().map_err(|e| {
        error!(error = %e, "Failed to load configuration");
        e
    })?;

    info!(
        daemon_id = %config.daemon_id,
        authority = %config.authority,
        scopes = ?config.refresh_scopes,
        refresh_interval_seconds = config.refresh_interval_seconds,
        max_consecutive_failures = config.max_consecutive_failures,
        health_bind_address = %config.health_bind_address,
        "Configuration loaded successfully"
    );

    // Initialize Prometheus metrics recorder
    info!("Initializing Prometheus metrics recorder...");
    let prometheus_handle = PrometheusBuilder::new().install_recorder().map_err(|e| {
        error!(error = %e, "Failed to install Prometheus metrics recorder");
        format!("Failed to install Prometheus metrics recorder: {e}")
    })?;

    let health_state = Arc::new(HealthState::new());

    // Connect to the token cache database
    info!(
        database = %redact_url_password(config.database_url.expose_secret()),
        "Connecting to database..."
    );
    let db_pool = connect(&DatabaseConfig::new(config.database_url.clone()))
        .await
        .map_err(|e| {
            error!(error = %e, "Failed to connect to database");
            e
        })?;
    info!("Database connection established");

    let byte_store = PgByteStore::new(
        db_pool.clone(),
        PgByteStoreOptions {
            sliding_expiration: Duration::from_secs(config.cache_sliding_expiration_seconds),
        },
    );
    let providers = TokenCacheProviderFactory::new(Arc::new(byte_store.clone()));
    let repository = Arc::new(AccountActivityRepository::new(db_pool));

    let client_options = HttpClientOptions::new(
        config.client_id.clone(),
        config.client_secret.clone(),
        config.authority.clone(),
    )
    .with_http_timeout(Duration::from_secs(config.http_timeout_seconds));
    let clients = Arc::new(HttpClientFactory::new(client_options).map_err(|e| {
        error!(error = %e, "Failed to create identity client factory");
        e
    })?);

    let runner = Arc::new(RefreshRunner::new(
        clients,
        providers,
        repository,
        RefreshRunnerConfig {
            scopes: config.refresh_scopes.clone(),
            max_consecutive_failures: config.max_consecutive_failures,
        },
    ));

    let shutdown_token = CancellationToken::new();

    // Start health HTTP server (MUST succeed - fail startup if it doesn't)
    let health_addr: SocketAddr = config.health_bind_address.parse().map_err(|e| {
        error!(error = %e, addr = %config.health_bind_address, "Invalid health bind address");
        format!("Invalid health bind address: {e}")
    })?;

    let app = health_router(Arc::clone(&health_state)).merge(metrics_router(prometheus_handle));

    // Bind listener BEFORE spawning to fail fast on bind errors
    let listener = tokio::net::TcpListener::bind(health_addr)
        .await
        .map_err(|e| {
            error!(error = %e, addr = %health_addr, "Failed to bind health server");
            format!("Failed to bind health server to {health_addr}: {e}")
        })?;
    info!(addr = %health_addr, "Health server bound successfully");

    let health_shutdown_token = shutdown_token.child_token();
    let health_handle = tokio::spawn(async move {
        let server = axum::serve(listener, app).with_graceful_shutdown(async move {
            health_shutdown_token.cancelled().await;
            info!("Health server shutting down");
        });
        if let Err(e) = server.await {
            error!(error = %e, "Health server failed");
        }
    });

    // Spawn cache maintenance
    let maintenance_handle = tokio::spawn(start_cache_maintenance(
        byte_store,
        Duration::from_secs(config.cache_cleanup_interval_seconds),
        shutdown_token.child_token(),
    ));

    // Spawn the refresh loop
    let mut refresh_handle = tokio::spawn(start_refresh_loop(
        runner,
        RefreshLoopConfig::new(
            Duration::from_secs(config.refresh_interval_seconds),
            config.max_consecutive_failures,
        ),
        Arc::clone(&health_state),
        shutdown_token.child_token(),
    ));

    info!(daemon_id = %config.daemon_id, "Token Refresh Daemon running");

    let finished_early = tokio::select! {
        () = shutdown_signal() => None,
        joined = &mut refresh_handle => Some(joined),
    };

    health_state.set_not_ready();
    shutdown_token.cancel();

    let stopped_by_signal = finished_early.is_none();
    let joined = match finished_early {
        Some(joined) => joined,
        None => refresh_handle.await,
    };

    let outcome: Result<(), Box<dyn std::error::Error>> = match joined {
        Ok(Ok(())) => {
            if !stopped_by_signal {
                warn!("Refresh loop exited unexpectedly");
            }
            Ok(())
        }
        Ok(Err(e)) => {
            error!(error = %e, "Refresh loop failed, shutting down");
            Err(e.into())
        }
        Err(e) => {
            error!(error = %e, "Refresh loop task panicked");
            Err(e.into())
        }
    };

    if let Err(e) = maintenance_handle.await {
        warn!(error = %e, "Cache maintenance task did not stop cleanly");
    }
    if let Err(e) = health_handle.await {
        warn!(error = %e, "Health server task did not stop cleanly");
    }

    info!("Token Refresh Daemon shutdown complete");
    outcome
}

/// Listens for shutdown signals (SIGTERM, SIGINT).
async fn shutdown_signal() {
    let ctrl_c = async {
        match signal::ctrl_c().await {
            Ok(()) => info!("Received SIGINT, starting graceful shutdown..."),
            Err(e) => error!(error = %e, "Failed to listen for SIGINT"),
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
                info!("Received SIGTERM, starting graceful shutdown...");
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {}
        () = terminate => {}
    }
}
