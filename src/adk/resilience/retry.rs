// SPDX-License-Identifier: MIT

//! Bounded retry with exponential backoff

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use super::clock::{Sleeper, TokioSleeper};
use crate::adk::error::ResourceError;

/// Retries transient failures up to `max_attempts` times.
///
/// The delay before attempt `n + 1` is `base_delay * 2^(n - 1)`, optionally
/// capped by `max_delay`. No jitter is applied, so the total backoff for a
/// permanently failing call is `base_delay * (2^(max_attempts - 1) - 1)`.
#[derive(Clone)]
pub struct RetryPolicy {
    max_attempts: u32,
    base_delay: Duration,
    max_delay: Option<Duration>,
    sleeper: Arc<dyn Sleeper>,
}

impl RetryPolicy {
    /// Create a policy. `max_attempts` below 1 is treated as 1.
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
            max_delay: None,
            sleeper: Arc::new(TokioSleeper),
        }
    }

    /// Cap any single backoff interval
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = Some(max_delay);
        self
    }

    pub fn with_sleeper(mut self, sleeper: Arc<dyn Sleeper>) -> Self {
        self.sleeper = sleeper;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Delay slept after the failure of `attempt` (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        let delay = self.base_delay.saturating_mul(1u32 << exponent);
        match self.max_delay {
            Some(cap) => delay.min(cap),
            None => delay,
        }
    }

    /// Run `operation` until it succeeds, fails non-transiently, or the
    /// attempt budget is spent. The last error is returned unchanged.
    pub async fn run<T, F, Fut>(&self, mut operation: F) -> Result<T, ResourceError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, ResourceError>>,
    {
        let mut attempt = 1;
        loop {
            match operation().await {
                Ok(value) => return Ok(value),
                Err(e) if !e.is_retryable() => return Err(e),
                Err(e) if attempt >= self.max_attempts => {
                    log::warn!("Giving up after {} attempts: {}", attempt, e);
                    return Err(e);
                }
                Err(e) => {
                    let wait = self.backoff(attempt);
                    log::warn!(
                        "Attempt {}/{} failed: {} - retrying in {:?}",
                        attempt,
                        self.max_attempts,
                        e,
                        wait
                    );
                    self.sleeper.sleep(wait).await;
                    attempt += 1;
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_secs(1))
    }
}
