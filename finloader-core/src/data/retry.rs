//! Retry with capped exponential backoff.
//!
//! Only transient failures (temporary rate limits, timeouts, 5xx) are retried.
//! Everything else, including the daily rate limit, is returned on first sight.

use super::provider::DataError;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total number of attempts, including the first one.
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_secs(20),
            max_delay: Duration::from_secs(60),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_retries,
            base_delay,
            max_delay,
        }
    }

    /// No waiting between attempts. Used by tests and offline tooling.
    pub fn immediate(max_retries: u32) -> Self {
        Self::new(max_retries, Duration::ZERO, Duration::ZERO)
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exponent)
            .min(self.max_delay)
    }

    /// Run `op` until it succeeds, fails permanently, or attempts run out.
    pub fn run<T, F>(&self, label: &str, op: F) -> Result<T, DataError>
    where
        F: FnMut(u32) -> Result<T, DataError>,
    {
        self.run_with_sleep(label, op, std::thread::sleep)
    }

    /// Like [`run`](Self::run) with an injectable sleep.
    pub fn run_with_sleep<T, F, S>(&self, label: &str, mut op: F, mut sleep: S) -> Result<T, DataError>
    where
        F: FnMut(u32) -> Result<T, DataError>,
        S: FnMut(Duration),
    {
        let attempts = self.max_retries.max(1);
        let mut attempt = 1;

        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if e.is_transient() => {
                    warn!("{label} failed (attempt {attempt}/{attempts}): {e}");
                    if attempt >= attempts {
                        error!("{label} permanently failed");
                        return Err(DataError::RetriesExhausted {
                            attempts,
                            last: Box::new(e),
                        });
                    }

                    let delay = self.delay_for(attempt);
                    warn!("trying again in {}s", delay.as_secs());
                    sleep(delay);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
