//! Token bucket rate limiter for producer calls

use std::sync::Mutex;
use std::time::Instant;

/// Token bucket: `burst` tokens, refilled at `rate` tokens per second
pub struct RateLimiter {
    burst: f64,
    rate: f64,
    bucket: Mutex<Bucket>,
}

struct Bucket {
    tokens: f64,
    refilled_at: Instant,
}

impl RateLimiter {
    /// Allow `rate` requests/sec with bursts of up to `burst`
    pub fn new(burst: u32, rate: u32) -> Self {
        Self {
            burst: burst as f64,
            rate: rate as f64,
            bucket: Mutex::new(Bucket {
                tokens: burst as f64,
                refilled_at: Instant::now(),
            }),
        }
    }

    /// Take one token; false when the caller should be throttled
    pub async fn check(&self) -> bool {
        let mut bucket = self
            .bucket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        let now = Instant::now();
        let elapsed = now.duration_since(bucket.refilled_at).as_secs_f64();
        bucket.tokens = (bucket.tokens + elapsed * self.rate).min(self.burst);
        bucket.refilled_at = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Tokens currently available
    pub fn remaining(&self) -> u32 {
        let bucket = self
            .bucket
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        bucket.tokens as u32
    }
}
