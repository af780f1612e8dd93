//! Sliding-window rate limiting for inbound deliveries.
//!
//! The limiter keeps the timestamps of accepted checks within a trailing
//! window (default 60 seconds) and rejects a check once the window holds the
//! configured ceiling. Stale timestamps are trimmed on every check, so the
//! window slides continuously rather than resetting on a fixed boundary.
//!
//! State is process-local and resets on restart. When the service runs as
//! multiple replicas, each replica enforces its own independent ceiling.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Rate limit configuration for webhook deliveries.
#[derive(Debug, Clone)]
pub struct RateLimit {
    /// Maximum number of accepted deliveries per window
    pub max_per_window: u32,
    /// Length of the sliding window
    pub window: Duration,
}

impl RateLimit {
    /// Create a rate limit of X deliveries per minute.
    pub fn per_minute(max: u32) -> Self {
        Self {
            max_per_window: max,
            window: Duration::from_secs(60),
        }
    }

    /// Create a rate limit of X deliveries per second.
    pub fn per_second(max: u32) -> Self {
        Self {
            max_per_window: max,
            window: Duration::from_secs(1),
        }
    }

    /// Set a custom window length.
    pub fn with_window(mut self, window: Duration) -> Self {
        self.window = window;
        self
    }
}

impl Default for RateLimit {
    fn default() -> Self {
        Self::per_minute(100)
    }
}

/// Sliding-window rate limiter over accepted-check timestamps.
#[derive(Debug)]
pub struct SlidingWindowLimiter {
    accepted: Arc<Mutex<VecDeque<Instant>>>,
    limit: RateLimit,
}

impl SlidingWindowLimiter {
    pub fn new(limit: RateLimit) -> Self {
        Self {
            accepted: Arc::new(Mutex::new(VecDeque::new())),
            limit,
        }
    }

    /// Check whether a delivery may be accepted right now.
    ///
    /// Trims timestamps older than the window, then tests the ceiling. An
    /// accepted check records the current timestamp; a rejected check records
    /// nothing, so rejections never extend the window's occupancy.
    pub fn check(&self) -> bool {
        let now = Instant::now();

        if let Ok(mut accepted) = self.accepted.lock() {
            while let Some(oldest) = accepted.front() {
                if now.duration_since(*oldest) >= self.limit.window {
                    accepted.pop_front();
                } else {
                    break;
                }
            }

            if accepted.len() as u32 >= self.limit.max_per_window {
                false
            } else {
                accepted.push_back(now);
                true
            }
        } else {
            // If lock is poisoned, allow the operation
            true
        }
    }

    /// Number of accepted deliveries currently inside the window.
    pub fn current_count(&self) -> u32 {
        let now = Instant::now();
        if let Ok(mut accepted) = self.accepted.lock() {
            while let Some(oldest) = accepted.front() {
                if now.duration_since(*oldest) >= self.limit.window {
                    accepted.pop_front();
                } else {
                    break;
                }
            }
            accepted.len() as u32
        } else {
            0
        }
    }

    /// Get the configured rate limit.
    pub fn limit(&self) -> &RateLimit {
        &self.limit
    }
}

impl Clone for SlidingWindowLimiter {
    fn clone(&self) -> Self {
        Self {
            accepted: Arc::clone(&self.accepted),
            limit: self.limit.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rate_limit_creation() {
        let limit = RateLimit::per_minute(100);
        assert_eq!(limit.max_per_window, 100);
        assert_eq!(limit.window, Duration::from_secs(60));

        let limit = RateLimit::per_second(5).with_window(Duration::from_millis(500));
        assert_eq!(limit.max_per_window, 5);
        assert_eq!(limit.window, Duration::from_millis(500));
    }

    #[test]
    fn test_default_limit() {
        let limit = RateLimit::default();
        assert_eq!(limit.max_per_window, 100);
        assert_eq!(limit.window, Duration::from_secs(60));
    }

    #[test]
    fn test_ceiling_enforced() {
        let limiter = SlidingWindowLimiter::new(RateLimit::per_minute(3));

        assert!(limiter.check());
        assert!(limiter.check());
        assert!(limiter.check());

        // Fourth check within the same window is rejected
        assert!(!limiter.check());
        assert_eq!(limiter.current_count(), 3);
    }

    #[test]
    fn test_rejected_checks_do_not_occupy_window() {
        let limiter = SlidingWindowLimiter::new(RateLimit::per_minute(1));

        assert!(limiter.check());
        assert!(!limiter.check());
        assert!(!limiter.check());

        assert_eq!(limiter.current_count(), 1);
    }

    #[test]
    fn test_window_slides() {
        let limiter = SlidingWindowLimiter::new(
            RateLimit::per_minute(2).with_window(Duration::from_millis(50)),
        );

        assert!(limiter.check());
        assert!(limiter.check());
        assert!(!limiter.check());

        // After the window passes the earliest timestamps, checks pass again
        std::thread::sleep(Duration::from_millis(60));
        assert!(limiter.check());
    }

    #[test]
    fn test_clone_shares_window() {
        let limiter1 = SlidingWindowLimiter::new(RateLimit::per_minute(2));
        let limiter2 = limiter1.clone();

        assert!(limiter1.check());
        assert!(limiter2.check());

        // Exhausted for both handles
        assert!(!limiter1.check());
        assert!(!limiter2.check());
    }

    #[test]
    fn test_zero_ceiling_rejects_everything() {
        let limiter = SlidingWindowLimiter::new(RateLimit::per_minute(0));
        assert!(!limiter.check());
        assert_eq!(limiter.current_count(), 0);
    }
}
