// src/retry.rs

//! Reusable retry policy: bounded attempts with capped exponential backoff
//! and jitter.
//!
//! Used by the manager when persisting the checklist and by
//! [`crate::broker::BrokerClient`] when a worker reports to an unreachable
//! broker.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use tracing::warn;

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `0` is treated as `1`.
    pub max_attempts: u32,
    pub base: Duration,
    pub cap: Duration,
    /// Fraction of the delay added as jitter, in `[0.0, 1.0]`.
    pub jitter: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base: Duration::from_millis(200),
            cap: Duration::from_secs(10),
            jitter: 0.2,
        }
    }
}

impl RetryPolicy {
    /// Policy that never retries.
    pub fn once() -> Self {
        Self {
            max_attempts: 1,
            base: Duration::ZERO,
            cap: Duration::ZERO,
            jitter: 0.0,
        }
    }

    /// Delay before retry number `attempt` (0-based):
    /// `min(cap, base * 2^attempt)` plus jitter.
    ///
    /// Jitter is derived from the attempt number rather than a random source
    /// so that delays are reproducible.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 2u32.checked_pow(attempt).unwrap_or(u32::MAX);
        let capped = self.base.saturating_mul(factor).min(self.cap);

        let jitter = self.jitter.clamp(0.0, 1.0);
        if jitter <= 0.0 {
            return capped;
        }
        let spread = f64::from(attempt.wrapping_mul(31) % 100) / 100.0;
        capped + capped.mul_f64(jitter * spread)
    }

    /// Run `op` until it succeeds or attempts are exhausted, sleeping between
    /// attempts. Returns the last error on exhaustion.
    pub async fn run<T, E, F, Fut>(&self, label: &str, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let max_attempts = self.max_attempts.max(1);
        let mut attempt: u32 = 0;

        loop {
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    attempt = attempt.saturating_add(1);
                    if attempt >= max_attempts {
                        warn!(
                            operation = label,
                            attempts = attempt,
                            error = %err,
                            "retries exhausted"
                        );
                        return Err(err);
                    }

                    let delay = self.delay_for(attempt - 1);
                    warn!(
                        operation = label,
                        attempt,
                        max_attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "operation failed; retrying after backoff"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}
