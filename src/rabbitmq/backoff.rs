// src/rabbitmq/backoff.rs
// Exponential backoff between reconnect attempts.

use std::time::Duration;

use crate::config::AmqpConfig;

/// Largest shift that still fits the `u32` multiplier.
const MAX_SHIFT: u32 = 31;

/// Maps a consecutive-failure count onto a wait duration.
///
/// The first failure waits `base_delay`, every further failure doubles the wait
/// until the multiplier reaches `2^max_backoff_factor`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffPolicy {
    base_delay: Duration,
    max_backoff_factor: u32,
}

impl BackoffPolicy {
    pub fn new(base_delay: Duration, max_backoff_factor: u32) -> Self {
        Self {
            base_delay,
            max_backoff_factor: max_backoff_factor.min(MAX_SHIFT),
        }
    }

    pub fn from_config(config: &AmqpConfig) -> Self {
        Self::new(config.backoff_delay(), config.max_backoff_factor)
    }

    /// Delay before retrying after the `attempt`-th consecutive failure (1-based).
    pub fn next_delay(&self, attempt: u32) -> Duration {
        let shift = attempt.saturating_sub(1).min(self.max_backoff_factor);
        self.base_delay.saturating_mul(1u32 << shift)
    }

    pub fn max_delay(&self) -> Duration {
        self.base_delay
            .saturating_mul(1u32 << self.max_backoff_factor)
    }
}
