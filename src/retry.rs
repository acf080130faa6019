//! Retry utilities with exponential backoff and jitter.
//!
//! Used for webhook configuration updates that lose an optimistic-concurrency
//! race: only errors accepted by the caller's predicate are retried, everything
//! else is returned immediately.
//!
//! # Example
//!
//! ```ignore
//! use crdb_operator::retry::{retry_with_backoff_if, RetryConfig};
//!
//! let updated = retry_with_backoff_if(
//!     &ctx,
//!     &RetryConfig::with_max_attempts(5),
//!     "patch_webhook",
//!     Error::is_conflict,
//!     || async { patch_once().await },
//! ).await?;
//! ```

use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::context::SetupContext;
use crate::Error;

/// Configuration for operations that may fail transiently.
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between retries
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            backoff_multiplier: 2.0,
        }
    }
}

impl RetryConfig {
    /// Create a config with a maximum number of attempts
    pub fn with_max_attempts(attempts: u32) -> Self {
        Self {
            max_attempts: attempts,
            ..Default::default()
        }
    }
}

/// Outcome of a retried operation that gave up
#[derive(Debug)]
pub enum RetryError {
    /// The last error was retryable but attempts ran out
    Exhausted {
        /// Attempts made
        attempts: u32,
        /// Last error seen
        last: Error,
    },
    /// A non-retryable error, or the context was cancelled
    Fatal(Error),
}

/// Execute an async operation, retrying errors accepted by `is_retryable`.
///
/// Uses exponential backoff with jitter between attempts. Backoff sleeps are
/// raced against the context so cancellation interrupts a pending retry.
pub async fn retry_with_backoff_if<F, Fut, T, P>(
    ctx: &SetupContext,
    config: &RetryConfig,
    operation_name: &str,
    is_retryable: P,
    mut operation: F,
) -> Result<T, RetryError>
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = Result<T, Error>>,
    P: Fn(&Error) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let e = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !is_retryable(&e) {
            return Err(RetryError::Fatal(e));
        }

        if config.max_attempts > 0 && attempt >= config.max_attempts {
            error!(
                operation = %operation_name,
                attempt = attempt,
                error = %e,
                "Operation failed after max retries"
            );
            return Err(RetryError::Exhausted {
                attempts: attempt,
                last: e,
            });
        }

        // Add jitter: 0.5x to 1.5x of the delay
        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

        warn!(
            operation = %operation_name,
            attempt = attempt,
            error = %e,
            delay_ms = jittered_delay.as_millis(),
            "Operation failed, retrying"
        );

        ctx.sleep(operation_name, jittered_delay)
            .await
            .map_err(RetryError::Fatal)?;

        // Exponential backoff, capped at max_delay
        delay = Duration::from_secs_f64(
            (delay.as_secs_f64() * config.backoff_multiplier).min(config.max_delay.as_secs_f64()),
        );
    }
}
