//! Retry with capped exponential backoff.
//!
//! Only failures classified as transient are retried. A non-transient
//! failure, or a failure on the final attempt, is returned immediately.
//! Delays are deterministic: `min(initial * multiplier^n, max)` after the
//! n-th failed attempt (0-indexed), with no jitter.

use crate::config::RetryConfig;
use std::future::Future;
use std::io;
use std::time::Duration;

/// Classifies an error as worth retrying.
pub trait TransientError {
    fn is_transient(&self) -> bool;
}

/// Message fragments that mark an otherwise opaque I/O error as transient.
const TRANSIENT_PATTERNS: [&str; 4] = [
    "timeout",
    "connection refused",
    "network is unreachable",
    "no route to host",
];

/// True when an error message names one of the transient network failures.
pub fn is_transient_message(message: &str) -> bool {
    let lower = message.to_lowercase();
    lower.contains("timed out") || TRANSIENT_PATTERNS.iter().any(|p| lower.contains(p))
}

impl TransientError for io::Error {
    fn is_transient(&self) -> bool {
        match self.kind() {
            io::ErrorKind::TimedOut
            | io::ErrorKind::ConnectionRefused
            | io::ErrorKind::NetworkUnreachable
            | io::ErrorKind::HostUnreachable => true,
            _ => is_transient_message(&self.to_string()),
        }
    }
}

impl TransientError for tokio::time::error::Elapsed {
    fn is_transient(&self) -> bool {
        true
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first. Values below 1 are treated as 1.
    pub max_attempts: u32,
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl RetryPolicy {
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_attempts,
            initial_delay: Duration::from_millis(config.initial_delay_ms),
            max_delay: Duration::from_millis(config.max_delay_ms),
            multiplier: config.multiplier,
        }
    }

    /// A policy that makes exactly one attempt.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    /// Delay to wait after the `attempt`-th failure (0-indexed).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let max_ms = self.max_delay.as_millis() as f64;
        let base = self.initial_delay.as_millis() as f64 * self.multiplier.powi(attempt as i32);
        let clamped = if base.is_nan() || base < 0.0 {
            0.0
        } else {
            base.min(max_ms)
        };
        Duration::from_millis(clamped as u64)
    }

    /// Run `f` until it succeeds, fails with a non-transient error, or the
    /// attempt budget is spent. Returns the success value or the last error.
    pub async fn execute<T, E, F, Fut>(&self, operation: &str, mut f: F) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: TransientError + std::fmt::Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;

        loop {
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    let last = attempt + 1 >= attempts;
                    if last || !err.is_transient() {
                        tracing::debug!(
                            "{} failed after {} attempt(s): {}",
                            operation,
                            attempt + 1,
                            err
                        );
                        return Err(err);
                    }

                    let delay = self.delay_for_attempt(attempt);
                    tracing::debug!(
                        "{} attempt {} failed ({}), retrying in {:?}",
                        operation,
                        attempt + 1,
                        err,
                        delay
                    );
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}
