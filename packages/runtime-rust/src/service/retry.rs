//! Bounded retry of a fallible unit of work.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use tracing::{error, warn};

/// How the delay grows between retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Backoff {
    /// Every retry waits the initial delay.
    Fixed,
    /// Each retry waits `factor` times the previous delay, capped at `max_delay`.
    Exponential { factor: u32, max_delay: Duration },
}

impl Backoff {
    /// Doubling backoff capped at one minute.
    #[must_use]
    pub fn exponential() -> Self {
        Backoff::Exponential {
            factor: 2,
            max_delay: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; 0 disables retrying.
    pub max_retries: u32,
    pub initial_delay: Duration,
    pub backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 0,
            initial_delay: Duration::from_millis(5_000),
            backoff: Backoff::Fixed,
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `retry` (1-based).
    #[must_use]
    pub fn delay_for(&self, retry: u32) -> Duration {
        match self.backoff {
            Backoff::Fixed => self.initial_delay,
            Backoff::Exponential { factor, max_delay } => {
                let exponent = retry.saturating_sub(1);
                let multiplier = factor.saturating_pow(exponent);
                self.initial_delay
                    .checked_mul(multiplier)
                    .map_or(max_delay, |d| d.min(max_delay))
            }
        }
    }
}

type Sleeper = Arc<dyn Fn(Duration) + Send + Sync>;

/// Runs work under a [`RetryPolicy`], sleeping on the calling thread between
/// attempts.
#[derive(Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    sleeper: Sleeper,
}

impl fmt::Debug for RetryExecutor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RetryExecutor")
            .field("policy", &self.policy)
            .finish_non_exhaustive()
    }
}

impl RetryExecutor {
    #[must_use]
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            sleeper: Arc::new(std::thread::sleep),
        }
    }

    /// Replaces the sleep function (tests record delays instead of waiting).
    #[must_use]
    pub fn with_sleeper(mut self, sleeper: impl Fn(Duration) + Send + Sync + 'static) -> Self {
        self.sleeper = Arc::new(sleeper);
        self
    }

    #[must_use]
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Calls `work` until it succeeds or `max_retries + 1` attempts have
    /// failed. `work` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns the error of the last attempt.
    pub fn run<T>(
        &self,
        label: &str,
        mut work: impl FnMut(u32) -> anyhow::Result<T>,
    ) -> anyhow::Result<T> {
        let attempts = self.policy.max_retries.saturating_add(1);
        let mut attempt = 1;
        loop {
            match work(attempt) {
                Ok(value) => return Ok(value),
                Err(err) if attempt < attempts => {
                    let delay = self.policy.delay_for(attempt);
                    warn!(
                        target: "apiproc::retry",
                        label,
                        attempt,
                        max_attempts = attempts,
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        error = %err,
                        "attempt failed, retrying"
                    );
                    (self.sleeper)(delay);
                    attempt += 1;
                }
                Err(err) => {
                    error!(
                        target: "apiproc::retry",
                        label,
                        attempts,
                        error = %err,
                        "all attempts failed"
                    );
                    return Err(err);
                }
            }
        }
    }
}

impl Default for RetryExecutor {
    fn default() -> Self {
        Self::new(RetryPolicy::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
