//! Per-client token-bucket admission control.
//!
//! Buckets refill continuously at `capacity / period` tokens per second
//! and hold at most `capacity` tokens. A client seen for the first time
//! starts with a full bucket. All buckets live behind a single mutex, and
//! the refill-then-consume sequence for a call runs inside one critical
//! section. State is never evicted; this limiter is scoped to a single
//! process.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy)]
struct Bucket {
    tokens: f64,
    last_refill: Instant,
}

/// Token-bucket limiter keyed by client identifier.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    period: Duration,
    buckets: Mutex<HashMap<String, Bucket>>,
}

impl RateLimiter {
    /// `requests` tokens per `period`. Both must be non-zero.
    pub fn new(requests: u32, period: Duration) -> Self {
        Self {
            capacity: f64::from(requests),
            period,
            buckets: Mutex::new(HashMap::new()),
        }
    }

    /// Consume one token for `client_id` if available.
    pub fn allow(&self, client_id: &str) -> bool {
        self.allow_at(client_id, Instant::now())
    }

    /// [`allow`](Self::allow) against an explicit clock reading.
    pub fn allow_at(&self, client_id: &str, now: Instant) -> bool {
        let mut buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());

        let bucket = buckets.entry(client_id.to_string()).or_insert(Bucket {
            tokens: self.capacity,
            last_refill: now,
        });

        let elapsed = now.saturating_duration_since(bucket.last_refill);
        let refill = if self.period.is_zero() {
            self.capacity
        } else {
            elapsed.as_secs_f64() / self.period.as_secs_f64() * self.capacity
        };
        bucket.tokens = (bucket.tokens + refill).min(self.capacity);
        bucket.last_refill = now;

        if bucket.tokens >= 1.0 {
            bucket.tokens -= 1.0;
            true
        } else {
            false
        }
    }

    /// Current token count for `client_id`, without refilling.
    pub fn tokens(&self, client_id: &str) -> Option<f64> {
        let buckets = self.buckets.lock().unwrap_or_else(|e| e.into_inner());
        buckets.get(client_id).map(|b| b.tokens)
    }
}
