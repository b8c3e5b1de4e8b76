//! Retry configuration, backoff calculation, and an async retry executor.
//!
//! - [`BackoffPolicy`]: attempt budget and exponential delay bounds
//! - [`calculate_backoff_delay`]: capped exponential delay for one attempt
//! - [`retry_async`]: run an operation until it succeeds, a non-retryable
//!   error occurs, or the attempt budget is spent

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Default attempt budget for connectivity probes.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 15;
/// Default base delay in milliseconds.
pub const DEFAULT_BASE_DELAY_MS: u64 = 1000;
/// Default maximum delay in milliseconds.
pub const DEFAULT_MAX_DELAY_MS: u64 = 5000;

/// Exponential backoff parameters.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BackoffPolicy {
    /// Total attempts including the first one.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    /// Delay before the second attempt in ms.
    #[serde(default = "default_base_delay_ms")]
    pub base_delay_ms: u64,
    /// Upper bound for any single delay in ms.
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}
fn default_base_delay_ms() -> u64 {
    DEFAULT_BASE_DELAY_MS
}
fn default_max_delay_ms() -> u64 {
    DEFAULT_MAX_DELAY_MS
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms: DEFAULT_MAX_DELAY_MS,
        }
    }
}

impl BackoffPolicy {
    /// Policy with the given attempt budget and delay cap, 1s base delay.
    pub fn new(max_attempts: u32, max_delay_ms: u64) -> Self {
        Self {
            max_attempts,
            base_delay_ms: DEFAULT_BASE_DELAY_MS,
            max_delay_ms,
        }
    }

    /// Delay to wait after the zero-based failed `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        Duration::from_millis(calculate_backoff_delay(
            attempt,
            self.base_delay_ms,
            self.max_delay_ms,
        ))
    }
}

/// Capped exponential backoff: `min(max_delay, base_delay * 2^attempt)`.
#[must_use]
pub fn calculate_backoff_delay(attempt: u32, base_delay_ms: u64, max_delay_ms: u64) -> u64 {
    base_delay_ms
        .saturating_mul(1u64 << attempt.min(31))
        .min(max_delay_ms)
}

/// Run `op` until it succeeds or the policy gives up.
///
/// Errors for which `is_retryable` returns `false` propagate immediately.
/// The last error is returned once the attempt budget is exhausted.
pub async fn retry_async<T, E, F, Fut, P>(policy: &BackoffPolicy, is_retryable: P, mut op: F) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    P: Fn(&E) -> bool,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) => {
                attempt += 1;
                if attempt >= policy.max_attempts.max(1) || !is_retryable(&err) {
                    return Err(err);
                }
                let delay = policy.delay_for(attempt - 1);
                debug!(attempt, delay_ms = delay.as_millis() as u64, "retrying after backoff");
                tokio::time::sleep(delay).await;
            }
        }
    }
}
