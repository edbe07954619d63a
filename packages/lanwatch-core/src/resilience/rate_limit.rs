//! Token-bucket admission control keyed by client identity.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

#[derive(Debug)]
struct Bucket {
    tokens: f64,
    last_refill_at: i64,
}

impl Bucket {
    fn refill(&mut self, now_ms: i64, capacity: f64, refill_per_ms: f64) {
        let elapsed = (now_ms - self.last_refill_at).max(0) as f64;
        if elapsed > 0.0 {
            self.tokens = (self.tokens + elapsed * refill_per_ms).min(capacity);
            self.last_refill_at = now_ms;
        }
    }
}

/// Per-key token buckets with lazy refill.
///
/// The map lock is held only to find or insert a bucket; each bucket has its
/// own mutex so callers on different keys never serialize on each other.
#[derive(Debug)]
pub struct RateLimiter {
    capacity: f64,
    refill_per_ms: f64,
    buckets: RwLock<HashMap<String, Arc<Mutex<Bucket>>>>,
}

impl RateLimiter {
    /// `refill_per_ms` is tokens per millisecond.
    #[must_use]
    pub fn new(capacity: f64, refill_per_ms: f64) -> Self {
        Self {
            capacity: capacity.max(0.0),
            refill_per_ms: refill_per_ms.max(0.0),
            buckets: RwLock::new(HashMap::new()),
        }
    }

    #[must_use]
    pub fn per_second(capacity: f64, refill_per_sec: f64) -> Self {
        Self::new(capacity, refill_per_sec / 1000.0)
    }

    /// Spend `cost` tokens from `key`'s bucket if available.
    pub fn try_consume(&self, key: &str, cost: f64, now_ms: i64) -> bool {
        let bucket = self.bucket(key, now_ms);
        let mut bucket = bucket.lock();
        bucket.refill(now_ms, self.capacity, self.refill_per_ms);
        if bucket.tokens >= cost {
            bucket.tokens -= cost;
            true
        } else {
            tracing::debug!("Rate limit hit for {} ({:.2} tokens left)", key, bucket.tokens);
            false
        }
    }

    /// Tokens currently available to `key`, after refill.
    pub fn available(&self, key: &str, now_ms: i64) -> f64 {
        let bucket = self.bucket(key, now_ms);
        let mut bucket = bucket.lock();
        bucket.refill(now_ms, self.capacity, self.refill_per_ms);
        bucket.tokens
    }

    /// Drop buckets that have refilled to capacity. They behave exactly like
    /// a fresh bucket, so forgetting them is lossless. A bucket some caller
    /// still holds is kept, or its next spend would land on a detached copy.
    pub fn prune(&self, now_ms: i64) -> usize {
        let mut buckets = self.buckets.write();
        let before = buckets.len();
        buckets.retain(|_, bucket| {
            if Arc::strong_count(bucket) > 1 {
                return true;
            }
            let mut bucket = bucket.lock();
            bucket.refill(now_ms, self.capacity, self.refill_per_ms);
            bucket.tokens < self.capacity
        });
        before - buckets.len()
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.read().len()
    }

    fn bucket(&self, key: &str, now_ms: i64) -> Arc<Mutex<Bucket>> {
        if let Some(bucket) = self.buckets.read().get(key) {
            return Arc::clone(bucket);
        }
        let mut buckets = self.buckets.write();
        Arc::clone(buckets.entry(key.to_string()).or_insert_with(|| {
            Arc::new(Mutex::new(Bucket {
                tokens: self.capacity,
                last_refill_at: now_ms,
            }))
        }))
    }
}
