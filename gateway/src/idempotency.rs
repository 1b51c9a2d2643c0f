use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use inference_core::Uuid;
use sha2::{Digest, Sha256};

struct Entry {
    task_id: Uuid,
    created_at: Instant,
}

/// `client_request_id → task_id` and content-hash idempotency (§4.4). Both
/// schemes are implemented; only the `client_request_id` path is wired into
/// task submission (see the gateway module notes on why content-hash
/// idempotency stays unused-but-tested).
pub struct IdempotencyCache {
    by_request_id: DashMap<String, Entry>,
    by_content: DashMap<String, Entry>,
    ttl: Duration,
    // Serializes read-and-possibly-write so two concurrent submissions with
    // the same id cannot both observe a miss and enqueue twice.
    write_lock: Mutex<()>,
}

impl IdempotencyCache {
    pub fn new(ttl_secs: u64) -> Self {
        Self {
            by_request_id: DashMap::new(),
            by_content: DashMap::new(),
            ttl: Duration::from_secs(ttl_secs),
            write_lock: Mutex::new(()),
        }
    }

    fn expired(&self, entry: &Entry) -> bool {
        entry.created_at.elapsed() >= self.ttl
    }

    pub fn get_task_id(&self, client_request_id: &str) -> Option<Uuid> {
        let _guard = self.write_lock.lock().expect("idempotency mutex poisoned");
        // The lookup below must not overlap with the `remove` call: both take
        // a lock on the same DashMap shard, and holding the `Ref` from `get`
        // across `remove` would deadlock on that shard.
        enum Lookup {
            Fresh(Uuid),
            Expired,
            Missing,
        }
        let lookup = match self.by_request_id.get(client_request_id) {
            Some(entry) if !self.expired(&entry) => Lookup::Fresh(entry.task_id),
            Some(_) => Lookup::Expired,
            None => Lookup::Missing,
        };
        match lookup {
            Lookup::Fresh(task_id) => Some(task_id),
            Lookup::Expired => {
                self.by_request_id.remove(client_request_id);
                None
            }
            Lookup::Missing => None,
        }
    }

    pub fn set_task_id(&self, client_request_id: impl Into<String>, task_id: Uuid) {
        let _guard = self.write_lock.lock().expect("idempotency mutex poisoned");
        self.by_request_id.insert(client_request_id.into(), Entry { task_id, created_at: Instant::now() });
    }

    pub fn get_by_content(&self, request: &serde_json::Value) -> Option<Uuid> {
        let key = content_hash(request);
        let _guard = self.write_lock.lock().expect("idempotency mutex poisoned");
        // See `get_task_id`: avoid overlapping the `get` Ref with `remove` on
        // the same shard.
        enum Lookup {
            Fresh(Uuid),
            Expired,
            Missing,
        }
        let lookup = match self.by_content.get(&key) {
            Some(entry) if !self.expired(&entry) => Lookup::Fresh(entry.task_id),
            Some(_) => Lookup::Expired,
            None => Lookup::Missing,
        };
        match lookup {
            Lookup::Fresh(task_id) => Some(task_id),
            Lookup::Expired => {
                self.by_content.remove(&key);
                None
            }
            Lookup::Missing => None,
        }
    }

    pub fn set_by_content(&self, request: &serde_json::Value, task_id: Uuid) {
        let key = content_hash(request);
        let _guard = self.write_lock.lock().expect("idempotency mutex poisoned");
        self.by_content.insert(key, Entry { task_id, created_at: Instant::now() });
    }

    pub fn clear(&self) {
        let _guard = self.write_lock.lock().expect("idempotency mutex poisoned");
        self.by_request_id.clear();
        self.by_content.clear();
    }
}

/// SHA-256 over canonical (sorted-key) JSON (§4.4).
fn content_hash(value: &serde_json::Value) -> String {
    let canonical = canonicalize(value);
    let mut hasher = Sha256::new();
    hasher.update(canonical.as_bytes());
    hex::encode(hasher.finalize())
}

fn canonicalize(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let entries: Vec<String> =
                keys.into_iter().map(|k| format!("{}:{}", serde_json::to_string(k).unwrap(), canonicalize(&map[k]))).collect();
            format!("{{{}}}", entries.join(","))
        }
        serde_json::Value::Array(items) => {
            let entries: Vec<String> = items.iter().map(canonicalize).collect();
            format!("[{}]", entries.join(","))
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn set_then_get_returns_same_task_id() {
        let cache = IdempotencyCache::new(3600);
        let task_id = Uuid::new_v4();
        cache.set_task_id("req-1", task_id);
        assert_eq!(cache.get_task_id("req-1"), Some(task_id));
    }

    #[test]
    fn unknown_request_id_is_none() {
        let cache = IdempotencyCache::new(3600);
        assert_eq!(cache.get_task_id("nope"), None);
    }

    #[test]
    fn expired_entry_is_evicted_on_read() {
        let cache = IdempotencyCache::new(0);
        let task_id = Uuid::new_v4();
        cache.set_task_id("req-1", task_id);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.get_task_id("req-1"), None);
    }

    #[test]
    fn content_hash_round_trips_and_differs_by_key_order_insensitivity() {
        let cache = IdempotencyCache::new(3600);
        let task_id = Uuid::new_v4();
        let request = json!({ "model": "superres-x4", "input": { "image_url": "https://x/y.jpg" } });
        let same_request_reordered = json!({ "input": { "image_url": "https://x/y.jpg" }, "model": "superres-x4" });

        cache.set_by_content(&request, task_id);
        assert_eq!(cache.get_by_content(&same_request_reordered), Some(task_id));
    }

    #[test]
    fn content_hash_differs_for_different_content() {
        let cache = IdempotencyCache::new(3600);
        let task_id = Uuid::new_v4();
        cache.set_by_content(&json!({ "model": "superres-x4" }), task_id);
        assert_eq!(cache.get_by_content(&json!({ "model": "image-scoring-v1" })), None);
    }
}
