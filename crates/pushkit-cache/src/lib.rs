//! # PushKit Cache
//!
//! Versioned cache buckets for the PushKit background agent.
//!
//! A bucket is a named map of request URL → stored response. Bucket
//! names carry a version suffix (`offline-page-v3`); bumping the
//! version is the only supported way to invalidate cached content.
//! Stale versions sharing the same naming prefix are garbage-collected
//! when a new worker activates.
//!
//! ## Architecture
//!
//! ```text
//! CacheStorage
//!     ├── Cache "offline-page-v2"   (stale, purged on activate)
//!     └── Cache "offline-page-v3"   (current)
//!             └── "/offline.html" → CacheEntry
//! ```

use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

// ==================== Errors ====================

/// Cache errors.
#[derive(Error, Debug, Clone)]
pub enum CacheError {
    #[error("Bucket not found: {0}")]
    BucketNotFound(String),

    #[error("Entry not found: {0}")]
    EntryNotFound(String),

    #[error("Snapshot error: {0}")]
    Snapshot(String),
}

// ==================== Naming ====================

/// Build a bucket name from a naming prefix and a version string.
pub fn bucket_name(prefix: &str, version: &str) -> String {
    format!("{prefix}{version}")
}

// ==================== Entry ====================

/// A stored request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Response status.
    pub status: u16,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Create an entry for a successful response.
    pub fn new(url: &str, status: u16, body: Vec<u8>) -> Self {
        Self {
            url: url.to_string(),
            status,
            headers: HashMap::new(),
            body,
            cached_at: now_millis(),
        }
    }

    /// Create an entry for an HTML document.
    pub fn document(url: &str, body: Vec<u8>) -> Self {
        let mut entry = Self::new(url, 200, body);
        entry
            .headers
            .insert("content-type".to_string(), "text/html".to_string());
        entry
    }

    /// Attach response headers.
    pub fn with_headers(mut self, headers: HashMap<String, String>) -> Self {
        self.headers = headers;
        self
    }
}

fn now_millis() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ==================== Cache ====================

/// A single named bucket.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct Cache {
    /// Bucket name.
    pub name: String,

    /// Stored entries, keyed by request URL.
    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create an empty bucket.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request URL.
    pub fn match_url(&self, url: &str) -> Option<&CacheEntry> {
        self.entries.get(url)
    }

    /// Store an entry, replacing any previous entry for the same URL.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.url.clone(), entry);
    }

    /// Delete an entry.
    pub fn delete(&mut self, url: &str) -> bool {
        self.entries.remove(url).is_some()
    }

    /// Get all stored request URLs.
    pub fn keys(&self) -> Vec<&str> {
        self.entries.keys().map(|s| s.as_str()).collect()
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the bucket is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

// ==================== Cache Storage ====================

/// All buckets owned by the agent.
///
/// The hosting environment persists this across worker restarts, hence
/// the serde derives and JSON snapshot support.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create empty storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Open a bucket (creates if absent).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Get a bucket without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if a bucket exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a bucket.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// Get all bucket names.
    pub fn keys(&self) -> Vec<String> {
        self.caches.keys().cloned().collect()
    }

    /// Match a request URL in a specific bucket.
    pub fn match_in(&self, bucket: &str, url: &str) -> Option<&CacheEntry> {
        self.caches.get(bucket)?.match_url(url)
    }

    /// Delete every bucket whose name starts with `prefix` but is not
    /// `keep`. Returns the names of the deleted buckets.
    ///
    /// This is the activation-time garbage collection: without it,
    /// stale versions accumulate without bound.
    pub fn purge_versions(&mut self, prefix: &str, keep: &str) -> Vec<String> {
        let stale: Vec<String> = self
            .caches
            .keys()
            .filter(|name| name.starts_with(prefix) && name.as_str() != keep)
            .cloned()
            .collect();

        for name in &stale {
            self.caches.remove(name);
            debug!(bucket = %name, "purged stale cache bucket");
        }
        stale
    }

    /// Serialize storage to a JSON snapshot.
    pub fn snapshot(&self) -> Result<String, CacheError> {
        serde_json::to_string(self).map_err(|e| CacheError::Snapshot(e.to_string()))
    }

    /// Restore storage from a JSON snapshot.
    pub fn restore(snapshot: &str) -> Result<Self, CacheError> {
        serde_json::from_str(snapshot).map_err(|e| CacheError::Snapshot(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bucket_name() {
        assert_eq!(bucket_name("offline-page-", "v3"), "offline-page-v3");
    }

    #[test]
    fn test_put_and_match() {
        let mut cache = Cache::new("offline-page-v1");
        cache.put(CacheEntry::document("/offline.html", b"<html>".to_vec()));

        assert!(cache.match_url("/offline.html").is_some());
        assert!(cache.match_url("/index.html").is_none());
    }

    #[test]
    fn test_put_replaces_same_url() {
        let mut cache = Cache::new("offline-page-v1");
        cache.put(CacheEntry::document("/offline.html", b"old".to_vec()));
        cache.put(CacheEntry::document("/offline.html", b"new".to_vec()));

        assert_eq!(cache.len(), 1);
        assert_eq!(cache.match_url("/offline.html").unwrap().body, b"new");
    }

    #[test]
    fn test_delete_entry() {
        let mut cache = Cache::new("offline-page-v1");
        cache.put(CacheEntry::document("/offline.html", Vec::new()));

        assert!(cache.delete("/offline.html"));
        assert!(!cache.delete("/offline.html"));
        assert!(cache.is_empty());
    }

    #[test]
    fn test_document_entry_headers() {
        let entry = CacheEntry::document("/offline.html", Vec::new());
        assert_eq!(entry.status, 200);
        assert_eq!(
            entry.headers.get("content-type").map(|s| s.as_str()),
            Some("text/html")
        );
    }

    #[test]
    fn test_open_is_idempotent() {
        let mut storage = CacheStorage::new();
        storage
            .open("offline-page-v1")
            .put(CacheEntry::document("/offline.html", Vec::new()));
        storage.open("offline-page-v1");

        assert_eq!(storage.keys().len(), 1);
        assert_eq!(storage.get("offline-page-v1").unwrap().len(), 1);
    }

    #[test]
    fn test_storage_delete() {
        let mut storage = CacheStorage::new();
        storage.open("offline-page-v1");

        assert!(storage.has("offline-page-v1"));
        assert!(storage.delete("offline-page-v1"));
        assert!(!storage.has("offline-page-v1"));
    }

    #[test]
    fn test_purge_versions_keeps_current() {
        let mut storage = CacheStorage::new();
        storage.open("offline-page-v1");
        storage.open("offline-page-v2");
        storage.open("offline-page-v3");

        let mut purged = storage.purge_versions("offline-page-", "offline-page-v3");
        purged.sort();

        assert_eq!(purged, vec!["offline-page-v1", "offline-page-v2"]);
        assert_eq!(storage.keys(), vec!["offline-page-v3"]);
    }

    #[test]
    fn test_purge_versions_ignores_other_prefixes() {
        let mut storage = CacheStorage::new();
        storage.open("offline-page-v1");
        storage.open("asset-cache-v1");

        storage.purge_versions("offline-page-", "offline-page-v2");

        assert!(storage.has("asset-cache-v1"));
        assert!(!storage.has("offline-page-v1"));
    }

    #[test]
    fn test_purge_versions_noop_when_only_current() {
        let mut storage = CacheStorage::new();
        storage.open("offline-page-v3");

        let purged = storage.purge_versions("offline-page-", "offline-page-v3");

        assert!(purged.is_empty());
        assert!(storage.has("offline-page-v3"));
    }

    #[test]
    fn test_match_in() {
        let mut storage = CacheStorage::new();
        storage
            .open("offline-page-v1")
            .put(CacheEntry::document("/offline.html", b"hi".to_vec()));

        assert!(storage.match_in("offline-page-v1", "/offline.html").is_some());
        assert!(storage.match_in("offline-page-v2", "/offline.html").is_none());
    }

    #[test]
    fn test_snapshot_restore() {
        let mut storage = CacheStorage::new();
        storage
            .open("offline-page-v1")
            .put(CacheEntry::document("/offline.html", b"<html>".to_vec()));

        let snapshot = storage.snapshot().unwrap();
        let restored = CacheStorage::restore(&snapshot).unwrap();

        assert_eq!(
            restored
                .match_in("offline-page-v1", "/offline.html")
                .unwrap()
                .body,
            b"<html>"
        );
    }

    #[test]
    fn test_restore_rejects_garbage() {
        assert!(matches!(
            CacheStorage::restore("not json"),
            Err(CacheError::Snapshot(_))
        ));
    }
}
