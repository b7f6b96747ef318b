//! Token bucket rate limiting.
//!
//! Pure state machine: time is injected by the caller, so limits are
//! testable without sleeping. One bucket per command class per session.

use std::time::Instant;

/// Token bucket with continuous refill.
#[derive(Debug, Clone)]
pub struct TokenBucket {
    tokens: f64,
    capacity: f64,
    rate_per_sec: f64,
    last_refill: Instant,
}

impl TokenBucket {
    /// Bucket starting full.
    pub fn new(capacity: f64, rate_per_sec: f64, now: Instant) -> Self {
        Self { tokens: capacity, capacity, rate_per_sec, last_refill: now }
    }

    fn refill(&mut self, now: Instant) {
        let elapsed = now.saturating_duration_since(self.last_refill).as_secs_f64();
        self.tokens = (self.tokens + elapsed * self.rate_per_sec).min(self.capacity);
        self.last_refill = now;
    }

    /// Take one token if available.
    pub fn try_acquire(&mut self, now: Instant) -> bool {
        self.refill(now);
        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available.
    pub fn available(&mut self, now: Instant) -> f64 {
        self.refill(now);
        self.tokens
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[test]
    fn burst_up_to_capacity_then_denied() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(3.0, 1.0, start);

        assert!(bucket.try_acquire(start));
        assert!(bucket.try_acquire(start));
        assert!(bucket.try_acquire(start));
        assert!(!bucket.try_acquire(start));
    }

    #[test]
    fn refills_over_time() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(1.0, 2.0, start);

        assert!(bucket.try_acquire(start));
        assert!(!bucket.try_acquire(start));

        // 2 tokens/sec: half a second buys one token back.
        assert!(bucket.try_acquire(start + Duration::from_millis(500)));
    }

    #[test]
    fn refill_caps_at_capacity() {
        let start = Instant::now();
        let mut bucket = TokenBucket::new(2.0, 10.0, start);

        let later = start + Duration::from_secs(60);
        assert!((bucket.available(later) - 2.0).abs() < f64::EPSILON);
    }
}
