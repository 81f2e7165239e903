//! Limiter store: per-key token buckets.
//!
//! # Design Decisions
//! - `try_acquire` returns the remaining wait; zero means admitted
//! - Each key's read-modify-write happens under its DashMap shard lock, so
//!   two callers racing on one key can never both take the last token
//! - Capacity is per store, the window per call: a bucket refills
//!   `capacity` tokens over one window

use dashmap::DashMap;
use std::time::{Duration, Instant};

use crate::limiter::error::LimiterError;

/// Serialization point for rate-limit decisions.
pub trait FrequencyLimiter: Send + Sync {
    /// Take one slot for `key`. Returns how long the caller must wait;
    /// `Duration::ZERO` means the call is admitted.
    fn try_acquire(&self, key: &str, window: Duration) -> Result<Duration, LimiterError>;
}

/// A simple token bucket rate limiter.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
    window: Duration,
}

impl TokenBucket {
    fn new(capacity: f64, window: Duration) -> Self {
        Self {
            tokens: capacity,
            last_update: Instant::now(),
            window,
        }
    }

    fn try_acquire(&mut self, capacity: f64, window: Duration) -> Duration {
        let now = Instant::now();
        let refill_rate = capacity / window.as_secs_f64();
        let elapsed = now.duration_since(self.last_update).as_secs_f64();

        // Refill tokens
        self.tokens = (self.tokens + elapsed * refill_rate).min(capacity);
        self.last_update = now;
        self.window = window;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Duration::ZERO
        } else {
            let wait = (1.0 - self.tokens) / refill_rate;
            Duration::try_from_secs_f64(wait).unwrap_or(window)
        }
    }

    /// Fully refilled, so dropping it changes nothing.
    fn is_idle(&self, now: Instant) -> bool {
        now.duration_since(self.last_update) >= self.window
    }
}

/// In-process [`FrequencyLimiter`].
#[derive(Debug)]
pub struct MemoryFrequencyLimiter {
    buckets: DashMap<String, TokenBucket>,
    capacity: f64,
}

impl MemoryFrequencyLimiter {
    /// `capacity` calls per window per key (at least one).
    pub fn new(capacity: u32) -> Self {
        Self {
            buckets: DashMap::new(),
            capacity: capacity.max(1) as f64,
        }
    }

    /// Drop buckets that have fully refilled. Returns how many were removed.
    pub fn evict_idle(&self) -> usize {
        let now = Instant::now();
        let before = self.buckets.len();
        self.buckets.retain(|_, bucket| !bucket.is_idle(now));
        before.saturating_sub(self.buckets.len())
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

impl Default for MemoryFrequencyLimiter {
    fn default() -> Self {
        Self::new(1)
    }
}

impl FrequencyLimiter for MemoryFrequencyLimiter {
    fn try_acquire(&self, key: &str, window: Duration) -> Result<Duration, LimiterError> {
        if window.is_zero() {
            return Ok(Duration::ZERO);
        }

        let capacity = self.capacity;
        let mut bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| TokenBucket::new(capacity, window));
        Ok(bucket.try_acquire(capacity, window))
    }
}
