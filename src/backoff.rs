//! # Exponential Backoff
//!
//! Provides a bounded exponential backoff mechanism for retrying transient
//! backend failures during a reconciliation pass.
//!
//! The sequence doubles from a configurable base up to a configurable cap,
//! e.g. with defaults: 1s, 2s, 4s, 8s, 16s, 30s (max).
//!
//! ## Usage
//!
//! ```rust
//! use karapace_operator::backoff::ExponentialBackoff;
//!
//! let mut backoff = ExponentialBackoff::new(1000, 30_000);
//! assert_eq!(backoff.next_backoff_ms(), 1000);
//! assert_eq!(backoff.next_backoff_ms(), 2000);
//! assert_eq!(backoff.next_backoff_ms(), 4000);
//! ```

use std::time::Duration;

/// Exponential backoff calculator
///
/// Each backoff doubles the previous one, capped at `max_ms`. The backoff
/// parameters are policy, not fixed constants; the reconciler takes them
/// from its [`RetryPolicy`](crate::config::RetryPolicy).
#[derive(Debug, Clone)]
pub struct ExponentialBackoff {
    /// Starting backoff value in milliseconds (for reset)
    base_ms: u64,
    /// Current backoff value in milliseconds
    current_ms: u64,
    /// Maximum backoff value in milliseconds
    max_ms: u64,
}

impl ExponentialBackoff {
    /// Create a new exponential backoff with the given base and cap in
    /// milliseconds.
    #[must_use]
    pub fn new(base_ms: u64, max_ms: u64) -> Self {
        Self {
            base_ms,
            current_ms: base_ms,
            max_ms,
        }
    }

    /// Get the next backoff duration in milliseconds and advance the sequence.
    pub fn next_backoff_ms(&mut self) -> u64 {
        let result_ms = self.current_ms;
        self.current_ms = std::cmp::min(self.current_ms.saturating_mul(2), self.max_ms);
        result_ms
    }

    /// Get the next backoff duration as a [`Duration`] and advance the
    /// sequence.
    #[must_use]
    pub fn next_backoff(&mut self) -> Duration {
        Duration::from_millis(self.next_backoff_ms())
    }

    /// Reset the backoff to the initial state.
    pub fn reset(&mut self) {
        self.current_ms = self.base_ms;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exponential_backoff_sequence() {
        let mut backoff = ExponentialBackoff::new(1000, 30_000);

        assert_eq!(backoff.next_backoff_ms(), 1000);
        assert_eq!(backoff.next_backoff_ms(), 2000);
        assert_eq!(backoff.next_backoff_ms(), 4000);
        assert_eq!(backoff.next_backoff_ms(), 8000);
        assert_eq!(backoff.next_backoff_ms(), 16_000);
    }

    #[test]
    fn test_exponential_backoff_max_cap() {
        let mut backoff = ExponentialBackoff::new(1000, 30_000);

        for _ in 0..5 {
            backoff.next_backoff_ms();
        }
        // 32s would exceed the cap
        assert_eq!(backoff.next_backoff_ms(), 30_000);
        // Should stay at max
        assert_eq!(backoff.next_backoff_ms(), 30_000);
    }

    #[test]
    fn test_exponential_backoff_reset() {
        let mut backoff = ExponentialBackoff::new(500, 10_000);

        assert_eq!(backoff.next_backoff_ms(), 500);
        assert_eq!(backoff.next_backoff_ms(), 1000);

        backoff.reset();

        // Should restart from the base after success
        assert_eq!(backoff.next_backoff_ms(), 500);
    }

    #[test]
    fn test_exponential_backoff_as_duration() {
        let mut backoff = ExponentialBackoff::new(250, 1000);

        assert_eq!(backoff.next_backoff(), Duration::from_millis(250));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(500));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(1000));
        assert_eq!(backoff.next_backoff(), Duration::from_millis(1000));
    }
}
