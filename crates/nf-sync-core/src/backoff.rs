//! Interval tracking for the configuration poller and the stream reconnect loop.

use std::time::Duration;

/// Configuration parameters for multiplicative backoff.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffConfig {
    /// Interval used after a successful exchange (and initially).
    pub initial: Duration,
    /// Upper bound applied to every computed interval.
    pub max: Duration,
    /// Factor applied to the current interval after each failure.
    pub factor: f64,
}

impl BackoffConfig {
    /// Backoff that always yields the same delay.
    pub fn fixed(delay: Duration) -> Self {
        Self {
            initial: delay,
            max: delay,
            factor: 1.0,
        }
    }

    /// Delay before attempt `failures + 1` after `failures` consecutive errors.
    pub fn delay_after(&self, failures: u32) -> Duration {
        // 2^64 seconds is far past any sane cap.
        let exponent = failures.min(64) as i32;
        let secs = self.initial.as_secs_f64() * self.factor.powi(exponent);
        Duration::from_secs_f64(secs.min(self.max.as_secs_f64()))
    }
}

/// Tracks the current interval of the backoff algorithm.
#[derive(Debug, Clone)]
pub struct BackoffState {
    config: BackoffConfig,
    current: Duration,
    failures: u32,
}

impl BackoffState {
    pub fn new(config: BackoffConfig) -> Self {
        Self {
            config,
            current: config.initial,
            failures: 0,
        }
    }

    /// Interval to wait before the next attempt.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Number of failures since the last success.
    pub fn failures(&self) -> u32 {
        self.failures
    }

    /// Registers a failure and returns the delay before retrying.
    pub fn register_error(&mut self) -> Duration {
        self.failures = self.failures.saturating_add(1);
        let next = self.current.as_secs_f64() * self.config.factor;
        self.current = Duration::from_secs_f64(next.min(self.config.max.as_secs_f64()));
        self.current
    }

    /// Registers a success, resetting the interval to its minimum.
    pub fn register_success(&mut self) -> Duration {
        self.failures = 0;
        self.current = self.config.initial;
        self.current
    }
}
