//! Per-connection message rate limiting.
//!
//! A rolling one-second window: each connection may deliver at most
//! `limit` messages in any trailing second. Over-limit messages are
//! dropped by the handler with `ERROR { RATE_LIMITED }` — they never
//! reach the engine.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

const WINDOW: Duration = Duration::from_secs(1);

/// Rolling-window counter for one connection.
#[derive(Debug)]
pub struct RateLimiter {
    limit: u32,
    hits: VecDeque<Instant>,
}

impl RateLimiter {
    /// Allows up to `limit` messages per rolling second.
    pub fn new(limit: u32) -> Self {
        Self {
            limit,
            hits: VecDeque::with_capacity(limit as usize),
        }
    }

    /// Records a message at `now` and returns whether it is admitted.
    pub fn allow(&mut self, now: Instant) -> bool {
        while let Some(&front) = self.hits.front() {
            if now.duration_since(front) >= WINDOW {
                self.hits.pop_front();
            } else {
                break;
            }
        }
        if (self.hits.len() as u32) < self.limit {
            self.hits.push_back(now);
            true
        } else {
            false
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_admits_up_to_the_limit() {
        let mut limiter = RateLimiter::new(3);
        let now = Instant::now();
        assert!(limiter.allow(now));
        assert!(limiter.allow(now));
        assert!(limiter.allow(now));
        assert!(!limiter.allow(now), "fourth message in the window is dropped");
    }

    #[test]
    fn test_window_rolls_forward() {
        let mut limiter = RateLimiter::new(2);
        let start = Instant::now();
        assert!(limiter.allow(start));
        assert!(limiter.allow(start + Duration::from_millis(500)));
        assert!(!limiter.allow(start + Duration::from_millis(900)));

        // The first hit ages out exactly one second after it landed.
        assert!(limiter.allow(start + Duration::from_millis(1_000)));
        // The 500 ms hit is still inside the trailing window.
        assert!(!limiter.allow(start + Duration::from_millis(1_100)));
        assert!(limiter.allow(start + Duration::from_millis(1_500)));
    }

    #[test]
    fn test_zero_limit_drops_everything() {
        let mut limiter = RateLimiter::new(0);
        assert!(!limiter.allow(Instant::now()));
    }
}
