//! TTL-keyed store of prior successful responses.
//!
//! Entries are keyed by a deterministic signature derived from the request
//! (connection, method, path, normalized query, normalized body) so that two
//! semantically identical requests map to the same entry regardless of
//! parameter ordering. Capacity is bounded; when full, the oldest-inserted
//! entry is evicted first (FIFO). Expired entries are treated as absent and
//! dropped lazily on lookup, or eagerly via [`ResponseCache::purge_expired`].

use serde::Deserialize;
use serde_json::Value;
use sha2::{Digest, Sha256};
use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};
use tracing::debug;

/// Response cache configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CacheConfig {
    /// Whether caching is enabled for the connection
    pub enabled: bool,
    /// Time-to-live for stored entries
    #[serde(with = "humantime_serde")]
    pub ttl: Duration,
    /// HTTP methods eligible for caching
    pub methods: Vec<String>,
    /// Path prefixes excluded from caching
    pub exclude: Vec<String>,
    /// Maximum number of stored entries
    pub max_entries: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl: Duration::from_secs(300),
            methods: vec!["GET".to_string(), "HEAD".to_string()],
            exclude: Vec::new(),
            max_entries: 1000,
        }
    }
}

/// The payload stored for one cached response.
#[derive(Debug, Clone)]
pub struct CachedResponse {
    /// Decoded response body (after response transforms).
    pub data: Value,
    /// HTTP status of the original response.
    pub status: u16,
    /// Response headers of the original response.
    pub headers: HashMap<String, String>,
}

struct CacheEntry {
    payload: CachedResponse,
    expires_at: Instant,
}

struct CacheInner {
    entries: HashMap<String, CacheEntry>,
    /// Keys in insertion order; drives FIFO eviction. May contain keys that
    /// were since overwritten or expired, skipped during eviction.
    insertion_order: VecDeque<String>,
}

/// Per-connection response cache.
pub struct ResponseCache {
    config: CacheConfig,
    inner: parking_lot::Mutex<CacheInner>,
}

impl ResponseCache {
    /// Create a new cache
    #[must_use]
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: parking_lot::Mutex::new(CacheInner {
                entries: HashMap::new(),
                insertion_order: VecDeque::new(),
            }),
        }
    }

    /// Create a disabled cache
    #[must_use]
    pub fn disabled() -> Self {
        Self::new(CacheConfig {
            enabled: false,
            ..Default::default()
        })
    }

    /// Get the configuration
    #[must_use]
    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Whether a request with this method and path is eligible for caching.
    #[must_use]
    pub fn is_cacheable(&self, method: &str, path: &str) -> bool {
        if !self.config.enabled {
            return false;
        }
        if !self
            .config
            .methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
        {
            return false;
        }
        !self.config.exclude.iter().any(|p| path.starts_with(p.as_str()))
    }

    /// Compute the deterministic signature for a request.
    ///
    /// Query parameters are sorted by key and value, and JSON object keys are
    /// serialized in sorted order, so the signature does not depend on
    /// parameter or key ordering. Headers never participate.
    #[must_use]
    pub fn signature(
        connection_id: &str,
        method: &str,
        path: &str,
        query: &[(String, String)],
        body: Option<&Value>,
    ) -> String {
        let mut sorted_query: Vec<&(String, String)> = query.iter().collect();
        sorted_query.sort();

        let mut hasher = Sha256::new();
        hasher.update(connection_id.as_bytes());
        hasher.update([0]);
        hasher.update(method.to_ascii_uppercase().as_bytes());
        hasher.update([0]);
        hasher.update(path.as_bytes());
        hasher.update([0]);
        for (name, value) in sorted_query {
            hasher.update(name.as_bytes());
            hasher.update([0x1f]);
            hasher.update(value.as_bytes());
            hasher.update([0x1e]);
        }
        hasher.update([0]);
        if let Some(body) = body {
            hasher.update(canonical_json(body).as_bytes());
        }
        hex::encode(hasher.finalize())
    }

    /// Look up a non-expired entry. Expired entries are treated as absent
    /// and evicted on the way out.
    #[must_use]
    pub fn lookup(&self, signature: &str) -> Option<CachedResponse> {
        if !self.config.enabled {
            return None;
        }
        let mut inner = self.inner.lock();
        let now = Instant::now();
        let fresh = match inner.entries.get(signature) {
            Some(entry) if entry.expires_at > now => Some(entry.payload.clone()),
            Some(_) => None,
            None => return None,
        };
        if fresh.is_none() {
            inner.entries.remove(signature);
        }
        fresh
    }

    /// Insert or overwrite an entry with the configured TTL.
    pub fn store(&self, signature: &str, payload: CachedResponse) {
        self.store_with_ttl(signature, payload, self.config.ttl);
    }

    /// Insert or overwrite an entry with an explicit TTL.
    pub fn store_with_ttl(&self, signature: &str, payload: CachedResponse, ttl: Duration) {
        if !self.config.enabled {
            return;
        }
        let mut inner = self.inner.lock();
        let entry = CacheEntry {
            payload,
            expires_at: Instant::now() + ttl,
        };
        if inner.entries.insert(signature.to_string(), entry).is_none() {
            inner.insertion_order.push_back(signature.to_string());
        }
        self.evict_if_needed(&mut inner);
        debug!(signature = %signature, ttl_ms = ttl.as_millis() as u64, "response cached");
    }

    /// Number of live (possibly expired but not yet evicted) entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().entries.len()
    }

    /// Whether the cache holds no entries.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop all expired entries eagerly.
    pub fn purge_expired(&self) {
        let now = Instant::now();
        let mut inner = self.inner.lock();
        inner.entries.retain(|_, entry| entry.expires_at > now);
        // Compact stale order keys so the queue cannot grow unbounded.
        let retained: VecDeque<String> = {
            let CacheInner {
                entries,
                insertion_order,
            } = &*inner;
            insertion_order
                .iter()
                .filter(|k| entries.contains_key(k.as_str()))
                .cloned()
                .collect()
        };
        inner.insertion_order = retained;
    }

    /// Remove every entry.
    pub fn clear(&self) {
        let mut inner = self.inner.lock();
        inner.entries.clear();
        inner.insertion_order.clear();
    }

    fn evict_if_needed(&self, inner: &mut CacheInner) {
        while inner.entries.len() > self.config.max_entries {
            match inner.insertion_order.pop_front() {
                Some(oldest) => {
                    // Keys overwritten since insertion stay ordered by their
                    // first insertion; stale queue entries are skipped.
                    if inner.entries.remove(&oldest).is_some() {
                        debug!(signature = %oldest, "evicted oldest cache entry");
                    }
                }
                None => break,
            }
        }
    }
}

/// Serialize JSON with object keys in sorted order at every level.
fn canonical_json(value: &Value) -> String {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let fields: Vec<String> = keys
                .into_iter()
                .map(|k| {
                    format!(
                        "{}:{}",
                        serde_json::to_string(k).unwrap_or_default(),
                        canonical_json(&map[k])
                    )
                })
                .collect();
            format!("{{{}}}", fields.join(","))
        }
        Value::Array(items) => {
            let fields: Vec<String> = items.iter().map(canonical_json).collect();
            format!("[{}]", fields.join(","))
        }
        other => serde_json::to_string(other).unwrap_or_default(),
    }
}
