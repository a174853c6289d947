//! Scheduled refresh loop.
//!
//! Runs a refresh cycle immediately, then once per interval. A failed cycle
//! is retried sooner, with exponential backoff capped at the interval. After
//! too many failed cycles in a row the loop gives up and returns the error so
//! the process can exit and be restarted by its supervisor.
//!
//! # Graceful Shutdown
//!
//! When the cancellation token is triggered the loop finishes the cycle in
//! progress and exits cleanly.

use crate::errors::RefreshError;
use crate::observability::HealthState;
use crate::runner::RefreshRunner;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

/// Initial backoff after a failed cycle.
pub const INITIAL_RETRY_BACKOFF: Duration = Duration::from_secs(1);

/// Refresh loop settings.
#[derive(Debug, Clone)]
pub struct RefreshLoopConfig {
    /// Delay between successful cycles.
    pub interval: Duration,
    /// Consecutive failed cycles tolerated before the loop gives up.
    pub max_consecutive_failures: u32,
    /// First retry delay after a failed cycle; doubles on each further failure.
    pub initial_backoff: Duration,
}

impl RefreshLoopConfig {
    #[must_use]
    pub fn new(interval: Duration, max_consecutive_failures: u32) -> Self {
        Self {
            interval,
            max_consecutive_failures,
            initial_backoff: INITIAL_RETRY_BACKOFF,
        }
    }
}

/// Start the refresh loop.
///
/// # Errors
///
/// Returns the last cycle error once `max_consecutive_failures` cycles in a
/// row have failed. Returns `Ok(())` when cancelled.
#[instrument(skip_all, name = "daemon.task.refresh_loop")]
pub async fn start_refresh_loop(
    runner: Arc<RefreshRunner>,
    config: RefreshLoopConfig,
    health: Arc<HealthState>,
    cancel_token: CancellationToken,
) -> Result<(), RefreshError> {
    info!(
        target: "daemon.task.refresh_loop",
        interval_seconds = config.interval.as_secs(),
        max_consecutive_failures = config.max_consecutive_failures,
        "Starting refresh loop"
    );

    let mut failed_cycles: u32 = 0;
    let mut backoff = config.initial_backoff.min(config.interval);

    loop {
        let delay = match runner.run_once().await {
            Ok(_) => {
                failed_cycles = 0;
                backoff = config.initial_backoff.min(config.interval);
                health.record_cycle_completed();
                config.interval
            }
            Err(e) => {
                failed_cycles += 1;
                health.set_not_ready();

                if failed_cycles >= config.max_consecutive_failures {
                    health.set_not_live();
                    error!(
                        target: "daemon.task.refresh_loop",
                        error = %e,
                        failed_cycles = failed_cycles,
                        "Refresh loop giving up after consecutive failed cycles"
                    );
                    return Err(e);
                }

                warn!(
                    target: "daemon.task.refresh_loop",
                    error = %e,
                    failed_cycles = failed_cycles,
                    retry_in_ms = backoff.as_millis(),
                    "Refresh cycle failed, retrying"
                );
                let delay = backoff;
                backoff = (backoff * 2).min(config.interval);
                delay
            }
        };

        tokio::select! {
            () = tokio::time::sleep(delay) => {}
            () = cancel_token.cancelled() => {
                info!(
                    target: "daemon.task.refresh_loop",
                    "Refresh loop received shutdown signal, exiting"
                );
                break;
            }
        }
    }

    info!(target: "daemon.task.refresh_loop", "Refresh loop stopped");
    Ok(())
}
