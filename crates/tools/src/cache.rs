//! TTL'd LRU cache for tool results.
//!
//! Keyed by `(tool_name, canonicalized-argument-JSON)`; only successful
//! results are stored. The LRU bound keeps the cache from growing with
//! distinct argument sets.

use std::num::NonZeroUsize;
use std::time::{Duration, Instant};

use lru::LruCache;
use parking_lot::Mutex;
use serde_json::Value;

/// Serialize a JSON value with object keys sorted at every level, so
/// `{"a":1,"b":2}` and `{"b":2,"a":1}` produce the same cache key.
pub fn canonical_json(value: &Value) -> String {
    fn write(value: &Value, out: &mut String) {
        match value {
            Value::Object(map) => {
                let mut keys: Vec<&String> = map.keys().collect();
                keys.sort();
                out.push('{');
                for (i, key) in keys.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    out.push_str(&Value::String((*key).clone()).to_string());
                    out.push(':');
                    write(&map[*key], out);
                }
                out.push('}');
            }
            Value::Array(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(',');
                    }
                    write(item, out);
                }
                out.push(']');
            }
            other => out.push_str(&other.to_string()),
        }
    }

    let mut out = String::new();
    write(value, &mut out);
    out
}

/// Build the cache key for a tool invocation.
pub fn cache_key(tool_name: &str, arguments: &Value) -> String {
    format!("{tool_name}:{}", canonical_json(arguments))
}

struct Entry {
    payload: Value,
    stored_at: Instant,
}

/// Bounded result cache with per-entry TTL.
pub struct ResultCache {
    entries: Mutex<LruCache<String, Entry>>,
    ttl: Duration,
}

impl ResultCache {
    pub fn new(capacity: usize, ttl: Duration) -> Self {
        let capacity = NonZeroUsize::new(capacity).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
            ttl,
        }
    }

    /// Fetch a cached payload; expired entries are evicted on access.
    pub fn get(&self, key: &str) -> Option<Value> {
        let mut entries = self.entries.lock();
        match entries.get(key) {
            Some(entry) if entry.stored_at.elapsed() < self.ttl => Some(entry.payload.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    pub fn put(&self, key: String, payload: Value) {
        self.entries.lock().put(
            key,
            Entry {
                payload,
                stored_at: Instant::now(),
            },
        );
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}
