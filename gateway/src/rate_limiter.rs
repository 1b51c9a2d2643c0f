use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;
use std::time::{Duration, Instant};

/// Per-key sliding-window rate limiter (§4.3). All operations are
/// serialized by a single mutex — the critical section is a handful of
/// `VecDeque` operations, so contention is negligible.
pub struct RateLimiter {
    buckets: Mutex<HashMap<String, VecDeque<Instant>>>,
    window: Duration,
    limit: u32,
}

impl RateLimiter {
    pub fn new(limit: u32, window_secs: u64) -> Self {
        Self { buckets: Mutex::new(HashMap::new()), window: Duration::from_secs(window_secs), limit }
    }

    /// Trims timestamps older than the window, then admits `now` if the
    /// remaining count is below `limit`. Returns whether the request is
    /// allowed.
    pub fn check(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut buckets = self.buckets.lock().expect("rate limiter mutex poisoned");
        let bucket = buckets.entry(key.to_string()).or_default();
        while let Some(&oldest) = bucket.front() {
            if now.duration_since(oldest) >= self.window {
                bucket.pop_front();
            } else {
                break;
            }
        }
        if bucket.len() as u32 >= self.limit {
            return false;
        }
        bucket.push_back(now);
        true
    }

    pub fn reset(&self, key: &str) {
        self.buckets.lock().expect("rate limiter mutex poisoned").remove(key);
    }
}
