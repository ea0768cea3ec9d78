//! # Rolling Restart Lock
//!
//! Coordination primitive backing the `restart` peer relation: a unit must
//! hold the lock before restarting the managed service, so only one unit of
//! the deployment restarts at a time. A held lock expires after a timeout
//! to avoid a crashed holder wedging the whole deployment.

use std::time::{Duration, Instant};

use tracing::{info, warn};

use crate::constants::DEFAULT_RESTART_LOCK_TIMEOUT_SECS;

/// Single-holder lock with expiry.
#[derive(Debug)]
pub struct RestartLock {
    holder: Option<String>,
    acquired_at: Option<Instant>,
    timeout: Duration,
}

impl Default for RestartLock {
    fn default() -> Self {
        Self::new(Duration::from_secs(DEFAULT_RESTART_LOCK_TIMEOUT_SECS))
    }
}

impl RestartLock {
    #[must_use]
    pub fn new(timeout: Duration) -> Self {
        Self {
            holder: None,
            acquired_at: None,
            timeout,
        }
    }

    /// Try to acquire the lock for `unit`.
    ///
    /// Re-acquisition by the current holder succeeds. A lock held past its
    /// timeout is treated as released.
    pub fn acquire(&mut self, unit: &str) -> bool {
        if let (Some(holder), Some(at)) = (&self.holder, self.acquired_at) {
            if holder == unit {
                return true;
            }
            if at.elapsed() < self.timeout {
                return false;
            }
            warn!(stale_holder = %holder, "restart lock expired, reclaiming");
        }

        info!(unit, "restart lock acquired");
        self.holder = Some(unit.to_string());
        self.acquired_at = Some(Instant::now());
        true
    }

    /// Release the lock if held by `unit`.
    pub fn release(&mut self, unit: &str) {
        if self.holder.as_deref() == Some(unit) {
            self.holder = None;
            self.acquired_at = None;
        }
    }

    /// Current non-expired holder, if any.
    #[must_use]
    pub fn holder(&self) -> Option<&str> {
        match (&self.holder, self.acquired_at) {
            (Some(holder), Some(at)) if at.elapsed() < self.timeout => Some(holder),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_single_holder() {
        let mut lock = RestartLock::default();
        assert!(lock.acquire("karapace/0"));
        assert!(!lock.acquire("karapace/1"));
        assert_eq!(lock.holder(), Some("karapace/0"));
    }

    #[test]
    fn test_reacquire_by_holder() {
        let mut lock = RestartLock::default();
        assert!(lock.acquire("karapace/0"));
        assert!(lock.acquire("karapace/0"));
    }

    #[test]
    fn test_release_hands_over() {
        let mut lock = RestartLock::default();
        assert!(lock.acquire("karapace/0"));
        lock.release("karapace/0");
        assert!(lock.acquire("karapace/1"));
    }

    #[test]
    fn test_release_by_non_holder_is_noop() {
        let mut lock = RestartLock::default();
        assert!(lock.acquire("karapace/0"));
        lock.release("karapace/1");
        assert_eq!(lock.holder(), Some("karapace/0"));
    }

    #[test]
    fn test_expired_lock_is_reclaimable() {
        let mut lock = RestartLock::new(Duration::from_millis(0));
        assert!(lock.acquire("karapace/0"));
        // Zero timeout expires immediately
        assert!(lock.acquire("karapace/1"));
        assert_eq!(lock.holder(), None);
    }
}
