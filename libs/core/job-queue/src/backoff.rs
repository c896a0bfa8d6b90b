//! Retry delay policies
//!
//! The same policy drives two things: when a failed job becomes eligible again,
//! and how long the startup connector waits between Redis connection attempts.

use std::future::Future;
use std::time::Duration;
use tracing::{debug, warn};

/// Delay applied before a failed job is eligible for another lease.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackoffPolicy {
    /// Same delay after every failure
    Fixed(Duration),
    /// `base * 2^(failures - 1)`, capped at `max`
    Exponential { base: Duration, max: Duration },
}

impl BackoffPolicy {
    pub fn fixed(delay: Duration) -> Self {
        BackoffPolicy::Fixed(delay)
    }

    pub fn exponential(base: Duration, max: Duration) -> Self {
        BackoffPolicy::Exponential { base, max }
    }

    /// Retry immediately, for tests and local development
    pub fn immediate() -> Self {
        BackoffPolicy::Fixed(Duration::ZERO)
    }

    /// Delay after the `failures`-th failed attempt (1-based).
    pub fn delay_for(&self, failures: u32) -> Duration {
        match *self {
            BackoffPolicy::Fixed(delay) => delay,
            BackoffPolicy::Exponential { base, max } => {
                let exponent = failures.saturating_sub(1).min(31);
                let factor = 2u32.saturating_pow(exponent);
                base.saturating_mul(factor).min(max)
            }
        }
    }

    /// Policy name used in logs and Redis script arguments
    pub fn kind(&self) -> &'static str {
        match self {
            BackoffPolicy::Fixed(_) => "fixed",
            BackoffPolicy::Exponential { .. } => "exponential",
        }
    }

    pub(crate) fn base_ms(&self) -> u64 {
        let base = match self {
            BackoffPolicy::Fixed(delay) => *delay,
            BackoffPolicy::Exponential { base, .. } => *base,
        };
        u64::try_from(base.as_millis()).unwrap_or(u64::MAX)
    }

    pub(crate) fn max_ms(&self) -> u64 {
        let max = match self {
            BackoffPolicy::Fixed(delay) => *delay,
            BackoffPolicy::Exponential { max, .. } => *max,
        };
        u64::try_from(max.as_millis()).unwrap_or(u64::MAX)
    }
}

impl Default for BackoffPolicy {
    /// 1s, 2s, 4s, ... up to 30s
    fn default() -> Self {
        BackoffPolicy::Exponential {
            base: Duration::from_secs(1),
            max: Duration::from_secs(30),
        }
    }
}

/// Run `operation` until it succeeds or `max_retries` retries are spent,
/// sleeping according to `policy` between attempts.
pub async fn retry_with_backoff<F, Fut, T, E>(
    mut operation: F,
    policy: BackoffPolicy,
    max_retries: u32,
) -> Result<T, E>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let mut failures = 0;

    loop {
        match operation().await {
            Ok(result) => {
                if failures > 0 {
                    debug!(retries = failures, "Operation succeeded after retrying");
                }
                return Ok(result);
            }
            Err(e) => {
                failures += 1;

                if failures > max_retries {
                    warn!(attempts = failures, error = %e, "Operation failed, giving up");
                    return Err(e);
                }

                let delay = policy.delay_for(failures);
                debug!(
                    attempt = failures,
                    max_retries,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "Operation failed, retrying"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn test_exponential_sequence_is_capped() {
        let policy = BackoffPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(1));
        assert_eq!(policy.delay_for(2), Duration::from_secs(2));
        assert_eq!(policy.delay_for(3), Duration::from_secs(4));
        assert_eq!(policy.delay_for(5), Duration::from_secs(16));
        assert_eq!(policy.delay_for(6), Duration::from_secs(30));
        assert_eq!(policy.delay_for(64), Duration::from_secs(30));
    }

    #[test]
    fn test_fixed_policy() {
        let policy = BackoffPolicy::fixed(Duration::from_millis(250));
        assert_eq!(policy.delay_for(1), Duration::from_millis(250));
        assert_eq!(policy.delay_for(10), Duration::from_millis(250));
        assert_eq!(policy.kind(), "fixed");
        assert_eq!(policy.base_ms(), 250);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_eventually_succeeds() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result = retry_with_backoff(
            || {
                let counter = counter.clone();
                async move {
                    if counter.fetch_add(1, Ordering::SeqCst) < 2 {
                        Err("not yet")
                    } else {
                        Ok("connected")
                    }
                }
            },
            BackoffPolicy::immediate(),
            5,
        )
        .await;

        assert_eq!(result, Ok("connected"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retry_with_backoff_gives_up() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();

        let result: Result<(), &str> = retry_with_backoff(
            || {
                let counter = counter.clone();
                async move {
                    counter.fetch_add(1, Ordering::SeqCst);
                    Err("refused")
                }
            },
            BackoffPolicy::immediate(),
            2,
        )
        .await;

        assert_eq!(result, Err("refused"));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
