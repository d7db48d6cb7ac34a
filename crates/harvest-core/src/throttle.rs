//! Request pacing and retry for remote page fetches.
//!
//! Two independent primitives:
//!
//! - [`throttled_delay`] sleeps for a uniformly random duration between
//!   [`ThrottleConfig::min_delay`] and [`ThrottleConfig::max_delay`]. It runs
//!   between page fetches to stay under the source's rate tolerance.
//! - [`with_retry`] re-invokes an operation that failed with a navigation
//!   error or a timeout, with exponential backoff
//!   (`base_delay * 2^(attempt-1)`). Backoff waits carry no jitter; only the
//!   inter-request delay is randomized.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use harvest_core::throttle::{RetryPolicy, ThrottleConfig, throttled_delay, with_retry};
//!
//! # async fn run() -> Result<(), harvest_core::AppError> {
//! let pacing = ThrottleConfig::new(Duration::from_secs(2), Duration::from_secs(5));
//! let policy = RetryPolicy::default();
//!
//! let body = with_retry(&policy, "listing page 1", || async {
//!     Ok::<_, harvest_core::AppError>("<html></html>".to_string())
//! })
//! .await?;
//! throttled_delay(&pacing).await;
//! # let _ = body;
//! # Ok(())
//! # }
//! ```

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::AppError;

/// Bounds of the randomized inter-request delay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ThrottleConfig {
    #[serde(with = "millis")]
    pub min_delay: Duration,
    #[serde(with = "millis")]
    pub max_delay: Duration,
}

impl ThrottleConfig {
    pub fn new(min_delay: Duration, max_delay: Duration) -> Self {
        Self {
            min_delay,
            max_delay,
        }
    }

    /// No delay at all. Used by tests and local fixtures.
    pub fn none() -> Self {
        Self::new(Duration::ZERO, Duration::ZERO)
    }

    /// Draw one delay, uniform in `[min_delay, max_delay]`.
    pub fn sample(&self) -> Duration {
        let (lo, hi) = if self.min_delay <= self.max_delay {
            (self.min_delay, self.max_delay)
        } else {
            (self.max_delay, self.min_delay)
        };
        let lo_ms = lo.as_millis() as u64;
        let hi_ms = hi.as_millis() as u64;
        if lo_ms == hi_ms {
            return Duration::from_millis(lo_ms);
        }
        Duration::from_millis(rand::thread_rng().gen_range(lo_ms..=hi_ms))
    }
}

impl Default for ThrottleConfig {
    /// 2-5 seconds between page fetches.
    fn default() -> Self {
        Self::new(Duration::from_secs(2), Duration::from_secs(5))
    }
}

/// Sleep for one randomized inter-request delay.
pub async fn throttled_delay(config: &ThrottleConfig) {
    let delay = config.sample();
    if delay.is_zero() {
        return;
    }
    tracing::debug!(delay_ms = %delay.as_millis(), "Throttling before next request");
    tokio::time::sleep(delay).await;
}

/// Bounded exponential backoff.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    #[serde(with = "millis")]
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    /// 3 attempts, waiting 5s then 10s.
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(5000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Wait after failed attempt `attempt` (1-indexed): `base * 2^(attempt-1)`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1 << exponent)
    }
}

/// Run `op` until it succeeds or `policy.max_attempts` attempts have failed.
///
/// Only [`AppError::is_retryable`] errors are retried; anything else is
/// returned at once. The error of the final attempt is returned unchanged.
/// Whether that is fatal to the run or only to the current unit of work is
/// the caller's call.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    label: &str,
    mut op: F,
) -> Result<T, AppError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, AppError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => {
                if attempt > 1 {
                    tracing::info!(%label, attempt, "Succeeded after retry");
                }
                return Ok(value);
            }
            Err(e) if !e.is_retryable() => {
                tracing::error!(%label, attempt, error = %e, "Non-retryable error");
                return Err(e);
            }
            Err(e) if attempt >= max_attempts => {
                tracing::error!(%label, attempt, max_attempts, error = %e, "Giving up");
                return Err(e);
            }
            Err(e) => {
                let wait = policy.delay_for_attempt(attempt);
                tracing::warn!(
                    %label,
                    attempt,
                    max_attempts,
                    wait_ms = %wait.as_millis(),
                    error = %e,
                    "Attempt failed, backing off"
                );
                tokio::time::sleep(wait).await;
                attempt += 1;
            }
        }
    }
}

/// Serialize `Duration`s as integer milliseconds in config files.
mod millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_millis)
    }
}
