//! Retry with exponential backoff and jitter
//!
//! Used for startup work outside the reconcile loop (CRD installation,
//! leader lease setup). Reconcile failures are retried by the controller's
//! work queue instead.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{error, warn};

use crate::Error;

/// Backoff configuration
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts (0 = infinite)
    pub max_attempts: u32,
    /// Initial delay between attempts
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier applied after every failure
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 0,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(30),
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

    fn next_delay(&self, delay: Duration) -> Duration {
        Duration::from_secs_f64(
            (delay.as_secs_f64() * self.backoff_multiplier).min(self.max_delay.as_secs_f64()),
        )
    }
}

/// Run `operation` until it succeeds or `max_attempts` is exhausted
pub async fn retry_with_backoff<F, Fut, T, E>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    retry_while(config, operation_name, operation, |_| true).await
}

/// Like [`retry_with_backoff`], but gives up on errors that aren't retryable
pub async fn retry_retryable<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    operation: F,
) -> Result<T, Error>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, Error>>,
{
    retry_while(config, operation_name, operation, Error::is_retryable).await
}

async fn retry_while<F, Fut, T, E, P>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
    should_retry: P,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        let e = match operation().await {
            Ok(result) => return Ok(result),
            Err(e) => e,
        };

        if !should_retry(&e) {
            error!(operation = %operation_name, attempt, error = %e, "Operation failed permanently");
            return Err(e);
        }
        if config.max_attempts > 0 && attempt >= config.max_attempts {
            error!(operation = %operation_name, attempt, error = %e, "Operation failed after max retries");
            return Err(e);
        }

        let jitter = rand::thread_rng().gen_range(0.5..1.5);
        let jittered = Duration::from_secs_f64(delay.as_secs_f64() * jitter);
        warn!(
            operation = %operation_name,
            attempt,
            error = %e,
            delay_ms = jittered.as_millis(),
            "Operation failed, retrying"
        );

        tokio::time::sleep(jittered).await;
        delay = config.next_delay(delay);
    }
}
