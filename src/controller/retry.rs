//! Bounded retry combinators
//!
//! Two shapes of waiting exist in a reconcile pass:
//! - `retry_on_conflict` reruns a read-modify-write when the API server reports a
//!   version conflict, with exponential backoff and jitter;
//! - `poll_with_linear_backoff` polls a condition (e.g. exec pod readiness) with a
//!   delay growing linearly per attempt.
//!
//! Both have a fixed attempt ceiling; exhaustion surfaces as an ordinary error.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::{debug, error, warn};

use crate::controller::error::{Error, Result};

/// Configuration for retrying optimistic-concurrency conflicts
#[derive(Clone, Debug)]
pub struct RetryConfig {
    /// Maximum number of attempts including the first one
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
            max_attempts: attempts.max(1),
            ..Default::default()
        }
    }
}

/// Run a read-modify-write operation, retrying while it fails with a version conflict.
///
/// The operation must re-read the object it modifies on every invocation.
/// Any error other than a conflict is returned immediately; the last conflict is
/// returned once `max_attempts` is exhausted.
pub async fn retry_on_conflict<F, Fut, T>(
    config: &RetryConfig,
    operation_name: &str,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;
    let mut delay = config.initial_delay;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_conflict() => {
                if attempt >= config.max_attempts {
                    error!(
                        operation = %operation_name,
                        attempt = attempt,
                        error = %e,
                        "Conflict retries exhausted"
                    );
                    return Err(e);
                }

                // Add jitter: 0.5x to 1.5x of the delay
                let jitter = rand::thread_rng().gen_range(0.5..1.5);
                let jittered_delay = Duration::from_secs_f64(delay.as_secs_f64() * jitter);

                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    delay_ms = jittered_delay.as_millis(),
                    "Version conflict, re-reading and retrying"
                );

                tokio::time::sleep(jittered_delay).await;

                delay = Duration::from_secs_f64(
                    (delay.as_secs_f64() * config.backoff_multiplier)
                        .min(config.max_delay.as_secs_f64()),
                );
            }
            Err(e) => return Err(e),
        }
    }
}

/// Bounded polling with linearly increasing delay (`step * attempt`)
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct LinearBackoff {
    pub max_attempts: u32,
    pub step: Duration,
}

impl Default for LinearBackoff {
    fn default() -> Self {
        Self {
            max_attempts: 20,
            step: Duration::from_secs(2),
        }
    }
}

impl LinearBackoff {
    /// Delay before the given attempt (1-based) is retried
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        self.step.saturating_mul(attempt)
    }
}

/// Poll `check` until it reports `true`.
///
/// `check` errors abort the wait immediately. After `max_attempts` negative
/// answers the wait fails with `Error::WaitExhausted`.
pub async fn poll_with_linear_backoff<F, Fut>(
    backoff: &LinearBackoff,
    operation_name: &str,
    mut check: F,
) -> Result<()>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<bool>>,
{
    for attempt in 1..=backoff.max_attempts {
        if check().await? {
            debug!(operation = %operation_name, attempt, "Condition reached");
            return Ok(());
        }
        if attempt < backoff.max_attempts {
            let delay = backoff.delay_for_attempt(attempt);
            debug!(
                operation = %operation_name,
                attempt,
                delay_ms = delay.as_millis(),
                "Condition not reached yet, waiting"
            );
            tokio::time::sleep(delay).await;
        }
    }

    Err(Error::WaitExhausted {
        operation: operation_name.to_string(),
        attempts: backoff.max_attempts,
    })
}
