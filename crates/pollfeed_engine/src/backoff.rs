//! Exponential reconnect backoff.

use crate::config::BackoffConfig;
use std::time::Duration;

/// Tracks the delay before the next reconnect attempt.
///
/// The delay starts at `min_delay`, doubles after each failure up to
/// `max_delay`, and drops back to `min_delay` on success.
#[derive(Debug, Clone)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    /// Creates a backoff at its minimum delay.
    pub fn new(config: BackoffConfig) -> Self {
        let current = config.min_delay;
        Self { config, current }
    }

    /// The delay the next failure will wait.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Returns true if no failure has been recorded since the last reset.
    pub fn is_at_min(&self) -> bool {
        self.current == self.config.min_delay
    }

    /// Returns true if the delay has reached its cap.
    pub fn is_at_cap(&self) -> bool {
        self.current == self.config.max_delay
    }

    /// Records a failure and returns how long to wait before retrying.
    pub fn next_delay(&mut self) -> Duration {
        let delay = self.current;
        self.current = self.current.saturating_mul(2).min(self.config.max_delay);
        delay
    }

    /// Records a success.
    pub fn reset(&mut self) {
        self.current = self.config.min_delay;
    }
}
