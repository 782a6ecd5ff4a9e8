//! Retry policies for the backfill loop
//!
//! - [`TransientBackoff`]: exponential backoff with jitter for transport
//!   failures. Never gives up; resets after a successful fetch.
//! - [`EmptyBatchRetry`]: bounded polling for forward scans whose window has
//!   no trades yet.

use std::time::Duration;

use crate::config::RetryConfig;

// =============================================================================
// EXPONENTIAL BACKOFF WITH JITTER
// =============================================================================

#[derive(Debug, Clone)]
pub struct TransientBackoff {
    base_ms: u64,
    max_ms: u64,
    multiplier: f64,
    jitter_factor: f64,
    attempt: u32,
}

impl TransientBackoff {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            base_ms: config.transient_backoff_base_ms,
            max_ms: config.transient_backoff_max_ms,
            multiplier: config.backoff_multiplier,
            jitter_factor: config.jitter_factor,
            attempt: 0,
        }
    }

    /// Next wait, `base * multiplier^attempt` capped at the max, ±jitter.
    pub fn next_backoff(&mut self) -> Duration {
        let base = (self.base_ms as f64) * self.multiplier.powi(self.attempt as i32);
        let capped = base.min(self.max_ms as f64);

        let jitter_range = capped * self.jitter_factor;
        let jitter = (rand::random::<f64>() * 2.0 - 1.0) * jitter_range;
        let final_ms = (capped + jitter).max(self.base_ms as f64);

        self.attempt = self.attempt.saturating_add(1);

        Duration::from_millis(final_ms as u64)
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempt(&self) -> u32 {
        self.attempt
    }
}

// =============================================================================
// EMPTY-BATCH POLLING
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmptyRetryDecision {
    /// Wait `delay`, move the window forward by the same amount, fetch again.
    /// `elapsed` is the session's total polling delay including this one.
    Retry {
        attempt: u32,
        delay: Duration,
        elapsed: Duration,
    },
    Exhausted { attempts: u32 },
}

/// Counts consecutive empty forward batches.
#[derive(Debug, Clone)]
pub struct EmptyBatchRetry {
    max_attempts: u32,
    delay: Duration,
    attempts: u32,
    /// Total delay spent polling over the whole session.
    elapsed: Duration,
}

impl EmptyBatchRetry {
    pub fn new(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.empty_batch_max_attempts,
            delay: config.empty_batch_delay(),
            attempts: 0,
            elapsed: Duration::ZERO,
        }
    }

    pub fn register_empty(&mut self) -> EmptyRetryDecision {
        if self.attempts >= self.max_attempts {
            return EmptyRetryDecision::Exhausted {
                attempts: self.attempts,
            };
        }
        self.attempts += 1;
        self.elapsed += self.delay;
        EmptyRetryDecision::Retry {
            attempt: self.attempts,
            delay: self.delay,
            elapsed: self.elapsed,
        }
    }

    /// A batch with trades arrived.
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn elapsed(&self) -> Duration {
        self.elapsed
    }

    /// Cursor distance to advance per retry, in ms.
    pub fn step_ms(&self) -> i64 {
        self.delay.as_millis() as i64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> RetryConfig {
        RetryConfig {
            empty_batch_max_attempts: 3,
            empty_batch_delay_ms: 10_000,
            transient_backoff_base_ms: 100,
            transient_backoff_max_ms: 30_000,
            ..RetryConfig::default()
        }
    }

    fn no_jitter() -> RetryConfig {
        RetryConfig {
            transient_backoff_base_ms: 250,
            transient_backoff_max_ms: 1_000,
            backoff_multiplier: 2.0,
            jitter_factor: 0.0,
            ..RetryConfig::default()
        }
    }

    #[test]
    fn test_backoff_doubles_up_to_max() {
        let mut backoff = TransientBackoff::new(&no_jitter());
        let waits: Vec<u128> = (0..5).map(|_| backoff.next_backoff().as_millis()).collect();
        assert_eq!(waits, vec![250, 500, 1_000, 1_000, 1_000]);
        assert_eq!(backoff.attempt(), 5);
    }

    #[test]
    fn test_successful_fetch_restarts_backoff_at_base() {
        let mut backoff = TransientBackoff::new(&no_jitter());
        backoff.next_backoff();
        backoff.next_backoff();
        backoff.reset();
        assert_eq!(backoff.attempt(), 0);
        assert_eq!(backoff.next_backoff(), Duration::from_millis(250));
    }

    #[test]
    fn test_jitter_never_drops_below_base() {
        let mut backoff = TransientBackoff::new(&RetryConfig {
            jitter_factor: 0.9,
            ..no_jitter()
        });
        for _ in 0..50 {
            let wait = backoff.next_backoff();
            assert!(wait >= Duration::from_millis(250));
            assert!(wait <= Duration::from_millis(1_900));
        }
    }

    #[test]
    fn test_zero_base_backoff_is_immediate() {
        let mut backoff = TransientBackoff::new(&RetryConfig {
            transient_backoff_base_ms: 0,
            ..RetryConfig::default()
        });
        assert_eq!(backoff.next_backoff(), Duration::ZERO);
    }

    #[test]
    fn test_empty_retry_cap() {
        let mut retry = EmptyBatchRetry::new(&config());
        for n in 1..=3 {
            assert_eq!(
                retry.register_empty(),
                EmptyRetryDecision::Retry {
                    attempt: n,
                    delay: Duration::from_secs(10),
                    elapsed: Duration::from_secs(10 * n as u64),
                }
            );
        }
        assert_eq!(
            retry.register_empty(),
            EmptyRetryDecision::Exhausted { attempts: 3 }
        );
        assert_eq!(retry.elapsed(), Duration::from_secs(30));
        assert_eq!(retry.step_ms(), 10_000);
    }

    #[test]
    fn test_empty_retry_counts_consecutive_polls() {
        let mut retry = EmptyBatchRetry::new(&config());
        retry.register_empty();
        retry.register_empty();
        retry.reset();
        assert_eq!(retry.attempts(), 0);
        // attempts restart, the elapsed total keeps growing
        assert_eq!(
            retry.register_empty(),
            EmptyRetryDecision::Retry {
                attempt: 1,
                delay: Duration::from_secs(10),
                elapsed: Duration::from_secs(30),
            }
        );
        assert_eq!(retry.elapsed(), Duration::from_secs(30));
    }
}
