//! Sliding-window per-source request counter.
//!
//! Strict request count per rolling second; no token-bucket smoothing. This
//! is predictable for industrial traffic, which is typically poll-driven and
//! bursty at sub-second granularity rather than sustained.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

const WINDOW: Duration = Duration::from_secs(1);

/// Owns the per-source window map with internal synchronization. The lock
/// is held only across the bounded O(window size) prune-and-append below;
/// it is never held across I/O.
pub struct RateLimiter {
    windows: Mutex<HashMap<String, Vec<Instant>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            windows: Mutex::new(HashMap::new()),
        }
    }

    /// Admit a request from `source` under `threshold` requests/second.
    /// Returns `true` (ALLOW) and records the timestamp, or `false` (DENY)
    /// without recording it.
    pub fn check(&self, source: &str, threshold: u32) -> bool {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let entry = windows.entry(source.to_string()).or_default();
        entry.retain(|&ts| now.duration_since(ts) < WINDOW);

        if entry.len() as u32 >= threshold {
            return false;
        }

        entry.push(now);
        true
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn admits_up_to_threshold_then_denies() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check("10.0.0.1", 5));
        }
        assert!(!limiter.check("10.0.0.1", 5));
    }

    #[test]
    fn s4_rate_limit_trip_exactly_five_of_ten() {
        let limiter = RateLimiter::new();
        let mut allowed = 0;
        for _ in 0..10 {
            if limiter.check("10.0.0.7", 5) {
                allowed += 1;
            }
        }
        assert_eq!(allowed, 5);
    }

    #[test]
    fn sources_are_independent() {
        let limiter = RateLimiter::new();
        for _ in 0..5 {
            assert!(limiter.check("10.0.0.1", 5));
        }
        assert!(limiter.check("10.0.0.2", 5));
    }

    #[test]
    fn window_slides_after_expiry() {
        let limiter = RateLimiter::new();
        for _ in 0..3 {
            assert!(limiter.check("10.0.0.1", 3));
        }
        assert!(!limiter.check("10.0.0.1", 3));

        std::thread::sleep(Duration::from_millis(1100));
        assert!(limiter.check("10.0.0.1", 3));
    }
}
