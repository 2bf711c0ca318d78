//! Chunk Cache Core - Epoch Arithmetic and Byte-Only Chunk Cache
//!
//! Timelines are served out of fixed-duration time buckets ("epochs" or
//! "chunks"). This crate holds the two pieces every repository shares:
//!
//! - **Epoch math**: `time_to_chunk`, `chunk_to_recent_time`, `prev_chunk`.
//!   Epochs are 600-second buckets labelled with the ISO-8601 UTC second of
//!   the bucket start, so labels sort lexicographically in time order.
//! - **`CacheStore`**: an in-process byte cache with the operation surface
//!   of a memcached client: `get`/`get_multi`/`set`/`replace`/`prepend`/
//!   `delete` plus `incr`/`decr` counters. `replace` and `prepend` fail on
//!   absent keys, which is what makes the chunk-body protocol safe: a
//!   prepend can never create a partial chunk out of thin air.
//!
//! Cache misses are `None`, never errors. The store is safe to share across
//! tasks; all operations are O(1) on a `DashMap`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use tracing::debug;

/// Epoch length. Ten minutes of wall clock per chunk.
pub const CHUNK_DURATION_SECS: i64 = 600;

/// Epoch label format: the UTC second of the bucket start.
const CHUNK_LABEL_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Returns the label of the epoch containing `t`.
pub fn time_to_chunk(t: DateTime<Utc>) -> String {
    let start = t.timestamp().div_euclid(CHUNK_DURATION_SECS) * CHUNK_DURATION_SECS;
    format_chunk(start)
}

/// Returns the upper bound (exclusive) of the epoch labelled `chunk`.
///
/// An unparsable label maps to the unix epoch boundary so a bad label never
/// matches any item.
pub fn chunk_to_recent_time(chunk: &str) -> DateTime<Utc> {
    let start = parse_chunk(chunk).unwrap_or(0);
    Utc.timestamp_opt(start + CHUNK_DURATION_SECS, 0).unwrap()
}

/// Returns the label of the epoch immediately before `chunk`.
pub fn prev_chunk(chunk: &str) -> String {
    let start = parse_chunk(chunk).unwrap_or(0);
    format_chunk(start - CHUNK_DURATION_SECS)
}

fn format_chunk(start: i64) -> String {
    Utc.timestamp_opt(start, 0)
        .single()
        .map(|t| t.format(CHUNK_LABEL_FORMAT).to_string())
        .unwrap_or_default()
}

fn parse_chunk(chunk: &str) -> Option<i64> {
    DateTime::parse_from_rfc3339(chunk)
        .ok()
        .map(|t| t.timestamp())
}

struct Entry {
    value: Vec<u8>,
    expires_at: Option<Instant>,
}

impl Entry {
    fn live(&self) -> bool {
        self.expires_at.map(|e| Instant::now() < e).unwrap_or(true)
    }
}

/// Statistics counters for the store.
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub item_count: usize,
}

/// Memcached-style in-process byte cache.
///
/// Values without a TTL live until deleted. Counters share the keyspace
/// with byte values; `incr`/`decr` on a non-numeric value is a no-op miss.
pub struct CacheStore {
    entries: DashMap<String, Entry>,
    hits: AtomicU64,
    misses: AtomicU64,
}

impl CacheStore {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    /// Get a value. Expired entries are removed on the way out.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        if let Some(entry) = self.entries.get(key) {
            if entry.live() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.value.clone());
            }
            drop(entry);
            self.entries.remove(key);
        }
        self.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Batched get. Returns hits only, keyed by the requested key.
    pub fn get_multi(&self, keys: &[String]) -> std::collections::HashMap<String, Vec<u8>> {
        keys.iter()
            .filter_map(|k| self.get(k).map(|v| (k.clone(), v)))
            .collect()
    }

    /// Set a value with no expiry.
    pub fn set(&self, key: &str, value: impl Into<Vec<u8>>) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at: None,
            },
        );
    }

    /// Set a value that expires after `ttl`.
    pub fn set_with_ttl(&self, key: &str, value: impl Into<Vec<u8>>, ttl: Duration) {
        self.entries.insert(
            key.to_string(),
            Entry {
                value: value.into(),
                expires_at: Some(Instant::now() + ttl),
            },
        );
    }

    /// Replace the value only if the key is already present and live.
    /// Returns false when the key was absent.
    pub fn replace(&self, key: &str, value: impl Into<Vec<u8>>) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.live() => {
                entry.value = value.into();
                true
            }
            _ => false,
        }
    }

    /// Prepend bytes to an existing value. Returns false when the key was
    /// absent; the caller is expected to repopulate from durable storage.
    pub fn prepend(&self, key: &str, value: &[u8]) -> bool {
        match self.entries.get_mut(key) {
            Some(mut entry) if entry.live() => {
                let mut next = Vec::with_capacity(value.len() + entry.value.len());
                next.extend_from_slice(value);
                next.extend_from_slice(&entry.value);
                entry.value = next;
                true
            }
            _ => false,
        }
    }

    pub fn delete(&self, key: &str) -> bool {
        self.entries.remove(key).is_some()
    }

    /// Increment a numeric counter. Misses (absent or non-numeric) return
    /// None so the caller can recover the true count and `set` it.
    pub fn incr(&self, key: &str, delta: u64) -> Option<u64> {
        self.adjust(key, delta as i64)
    }

    /// Decrement a numeric counter, floored at zero like memcached.
    pub fn decr(&self, key: &str, delta: u64) -> Option<u64> {
        self.adjust(key, -(delta as i64))
    }

    fn adjust(&self, key: &str, delta: i64) -> Option<u64> {
        let mut entry = self.entries.get_mut(key)?;
        if !entry.live() {
            return None;
        }
        let current: i64 = std::str::from_utf8(&entry.value).ok()?.parse().ok()?;
        let next = (current + delta).max(0) as u64;
        entry.value = next.to_string().into_bytes();
        Some(next)
    }

    /// Remove expired entries. Returns how many were dropped.
    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let dead: Vec<String> = self
            .entries
            .iter()
            .filter(|e| e.expires_at.map(|x| now >= x).unwrap_or(false))
            .map(|e| e.key().clone())
            .collect();
        for key in &dead {
            self.entries.remove(key);
        }
        if !dead.is_empty() {
            debug!(expired = dead.len(), "cache sweep removed expired entries");
        }
        dead.len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            item_count: self.entries.len(),
        }
    }

    pub fn clear(&self) {
        self.entries.clear();
    }
}

impl Default for CacheStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(unix: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(unix, 0).unwrap()
    }

    #[test]
    fn chunk_labels_align_to_buckets() {
        // 2024-01-01T00:00:00Z == 1704067200, a bucket boundary
        assert_eq!(time_to_chunk(at(1704067200)), "2024-01-01T00:00:00Z");
        assert_eq!(time_to_chunk(at(1704067200 + 599)), "2024-01-01T00:00:00Z");
        assert_eq!(time_to_chunk(at(1704067200 + 600)), "2024-01-01T00:10:00Z");
    }

    #[test]
    fn chunk_recent_time_is_exclusive_upper_bound() {
        let label = time_to_chunk(at(1704067200 + 30));
        assert_eq!(chunk_to_recent_time(&label), at(1704067200 + 600));
    }

    #[test]
    fn prev_chunk_steps_back_one_bucket() {
        let label = time_to_chunk(at(1704067200));
        assert_eq!(prev_chunk(&label), "2023-12-31T23:50:00Z");
    }

    #[test]
    fn chunk_labels_sort_lexicographically() {
        let a = time_to_chunk(at(1704067200));
        let b = time_to_chunk(at(1704067200 + 600));
        let c = time_to_chunk(at(1704067200 + 86400));
        assert!(a < b && b < c);
    }

    #[test]
    fn bad_label_maps_to_epoch_floor() {
        assert_eq!(chunk_to_recent_time("garbage"), at(CHUNK_DURATION_SECS));
    }

    #[test]
    fn get_set_roundtrip() {
        let cache = CacheStore::new();
        assert!(cache.get("k").is_none());
        cache.set("k", b"value".to_vec());
        assert_eq!(cache.get("k").unwrap(), b"value");
    }

    #[test]
    fn ttl_expiry() {
        let cache = CacheStore::new();
        cache.set_with_ttl("k", b"v".to_vec(), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert!(cache.get("k").is_none());
    }

    #[test]
    fn replace_requires_presence() {
        let cache = CacheStore::new();
        assert!(!cache.replace("k", b"v".to_vec()));
        cache.set("k", b"old".to_vec());
        assert!(cache.replace("k", b"new".to_vec()));
        assert_eq!(cache.get("k").unwrap(), b"new");
    }

    #[test]
    fn prepend_requires_presence_and_prefixes() {
        let cache = CacheStore::new();
        assert!(!cache.prepend("k", b",a"));
        cache.set("k", b",b,c".to_vec());
        assert!(cache.prepend("k", b",a"));
        assert_eq!(cache.get("k").unwrap(), b",a,b,c");
    }

    #[test]
    fn counters_adjust_and_floor() {
        let cache = CacheStore::new();
        assert!(cache.incr("n", 1).is_none()); // miss: caller must recover
        cache.set("n", b"41".to_vec());
        assert_eq!(cache.incr("n", 1), Some(42));
        assert_eq!(cache.decr("n", 100), Some(0));
    }

    #[test]
    fn get_multi_returns_hits_only() {
        let cache = CacheStore::new();
        cache.set("a", b"1".to_vec());
        cache.set("c", b"3".to_vec());
        let got = cache.get_multi(&["a".into(), "b".into(), "c".into()]);
        assert_eq!(got.len(), 2);
        assert_eq!(got["a"], b"1");
        assert!(!got.contains_key("b"));
    }

    #[test]
    fn sweep_drops_only_expired() {
        let cache = CacheStore::new();
        cache.set("keep", b"v".to_vec());
        cache.set_with_ttl("drop", b"v".to_vec(), Duration::from_millis(0));
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(cache.sweep_expired(), 1);
        assert!(cache.get("keep").is_some());
    }
}
