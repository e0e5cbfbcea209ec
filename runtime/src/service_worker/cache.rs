//! Cache API Implementation
//!
//! Generation-partitioned artifact storage for the worker. Each generation
//! is a named [`Cache`]; the worker only ever reads and writes the one named
//! by its version tag.

use std::collections::BTreeMap;

use async_trait::async_trait;
use spin::RwLock;

use super::fetch::{RequestKey, Response};

/// Default quota for one storage (50 MB)
pub const DEFAULT_QUOTA: usize = 50 * 1024 * 1024;

/// Estimated per-entry overhead for key and headers
const ENTRY_OVERHEAD: usize = 256;

/// Cache error types
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum CacheError {
    #[error("cache quota exceeded: {needed} bytes needed, {available} available")]
    QuotaExceeded { needed: usize, available: usize },

    #[error("storage error: {0}")]
    Storage(String),
}

/// Key/value store over request identity, partitioned by generation tag.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// Open (or create) the generation named `tag`.
    async fn open(&self, tag: &str) -> Result<(), CacheError>;

    /// Look up `key` in generation `tag`.
    async fn match_request(
        &self,
        tag: &str,
        key: &RequestKey,
    ) -> Result<Option<Response>, CacheError>;

    /// Store `response` under `key` in generation `tag`, replacing any
    /// previous entry. Creates the generation if needed.
    async fn put(&self, tag: &str, key: RequestKey, response: Response)
        -> Result<(), CacheError>;

    /// Like [`put`](Self::put), but never creates a generation. Returns
    /// `false` without writing when `tag` does not exist.
    async fn put_existing(
        &self,
        tag: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<bool, CacheError>;

    /// Store every entry or none of them.
    async fn put_all(
        &self,
        tag: &str,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError> {
        for (key, response) in entries {
            self.put(tag, key, response).await?;
        }
        Ok(())
    }

    /// Tags of every stored generation.
    async fn keys(&self) -> Result<Vec<String>, CacheError>;

    /// Delete a whole generation. Returns whether it existed.
    async fn delete(&self, tag: &str) -> Result<bool, CacheError>;
}

/// A cached response together with its accounting size
#[derive(Debug, Clone)]
struct CacheEntry {
    response: Response,
    size: usize,
}

impl CacheEntry {
    fn new(response: Response) -> Self {
        let size = entry_size(&response);
        Self { response, size }
    }
}

fn entry_size(response: &Response) -> usize {
    response.body_len() + ENTRY_OVERHEAD
}

/// One cache generation
#[derive(Debug, Default)]
pub struct Cache {
    /// Cached entries (identity -> entry)
    entries: BTreeMap<RequestKey, CacheEntry>,
    /// Total size in bytes
    total_size: usize,
}

impl Cache {
    /// Match a request
    pub fn match_request(&self, key: &RequestKey) -> Option<Response> {
        self.entries.get(key).map(|e| e.response.clone())
    }

    /// Add a request/response pair, replacing any previous entry
    fn put(&mut self, key: RequestKey, response: Response) {
        let entry = CacheEntry::new(response);
        self.total_size += entry.size;
        if let Some(old) = self.entries.insert(key, entry) {
            self.total_size = self.total_size.saturating_sub(old.size);
        }
    }

    /// All stored identities
    pub fn keys(&self) -> Vec<RequestKey> {
        self.entries.keys().cloned().collect()
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether this generation is empty
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get total size
    pub fn size(&self) -> usize {
        self.total_size
    }
}

/// In-memory cache storage with a byte quota.
///
/// Entries are never evicted; a write that would exceed the quota fails.
pub struct MemoryCacheStorage {
    /// Generations by tag
    caches: RwLock<BTreeMap<String, Cache>>,
    /// Quota (bytes)
    quota: usize,
}

impl MemoryCacheStorage {
    /// Create an empty storage with the default quota
    pub fn new() -> Self {
        Self::with_quota(DEFAULT_QUOTA)
    }

    /// Create an empty storage with a custom quota
    pub fn with_quota(quota: usize) -> Self {
        Self {
            caches: RwLock::new(BTreeMap::new()),
            quota,
        }
    }

    /// Whether a generation exists
    pub fn has(&self, tag: &str) -> bool {
        self.caches.read().contains_key(tag)
    }

    /// Number of entries in a generation (0 if absent)
    pub fn len(&self, tag: &str) -> usize {
        self.caches.read().get(tag).map(Cache::len).unwrap_or(0)
    }

    /// Identities stored in a generation
    pub fn entries(&self, tag: &str) -> Vec<RequestKey> {
        self.caches
            .read()
            .get(tag)
            .map(Cache::keys)
            .unwrap_or_default()
    }

    /// Bytes used across all generations
    pub fn usage(&self) -> usize {
        self.caches.read().values().map(Cache::size).sum()
    }

    /// Get quota
    pub fn quota(&self) -> usize {
        self.quota
    }

    fn insert(
        &self,
        caches: &mut BTreeMap<String, Cache>,
        tag: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<(), CacheError> {
        let usage: usize = caches.values().map(Cache::size).sum();
        let replaced = caches
            .get(tag)
            .and_then(|cache| cache.entries.get(&key))
            .map(|entry| entry.size)
            .unwrap_or(0);
        self.check_quota(usage.saturating_sub(replaced), entry_size(&response))?;

        caches.entry(tag.to_string()).or_default().put(key, response);
        Ok(())
    }

        fn check_quota(&self, usage: usize, needed: usize) -> Result<(), CacheError> {
        let available = self.quota.saturating_sub(usage);
        if needed > available {
            Err(CacheError::QuotaExceeded { needed, available })
        } else {
            Ok(())
        }
    }
}

impl Default for MemoryCacheStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStorage {
    async fn open(&self, tag: &str) -> Result<(), CacheError> {
        self.caches.write().entry(tag.to_string()).or_default();
        Ok(())
    }

    async fn match_request(
        &self,
        tag: &str,
        key: &RequestKey,
    ) -> Result<Option<Response>, CacheError> {
        Ok(self
            .caches
            .read()
            .get(tag)
            .and_then(|cache| cache.match_request(key)))
    }

    async fn put(
        &self,
        tag: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<(), CacheError> {
        self.insert(&mut self.caches.write(), tag, key, response)
    }

    async fn put_existing(
        &self,
        tag: &str,
        key: RequestKey,
        response: Response,
    ) -> Result<bool, CacheError> {
        let mut caches = self.caches.write();
        if !caches.contains_key(tag) {
            return Ok(false);
        }
        self.insert(&mut caches, tag, key, response)?;
        Ok(true)
    }

    async fn put_all(
        &self,
        tag: &str,
        entries: Vec<(RequestKey, Response)>,
    ) -> Result<(), CacheError> {
        let mut caches = self.caches.write();
        let usage: usize = caches.values().map(Cache::size).sum();
        let needed = entries.iter().map(|(_, r)| entry_size(r)).sum();
        let replaced: usize = caches
            .get(tag)
            .map(|cache| {
                entries
                    .iter()
                    .filter_map(|(key, _)| cache.entries.get(key))
                    .map(|entry| entry.size)
                    .sum()
            })
            .unwrap_or(0);
        self.check_quota(usage.saturating_sub(replaced), needed)?;

        let cache = caches.entry(tag.to_string()).or_default();
        for (key, response) in entries {
            cache.put(key, response);
        }
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>, CacheError> {
        Ok(self.caches.read().keys().cloned().collect())
    }

    async fn delete(&self, tag: &str) -> Result<bool, CacheError> {
        Ok(self.caches.write().remove(tag).is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::service_worker::fetch::RequestMethod;
    use url::Url;

    fn key(path: &str) -> RequestKey {
        let url = Url::parse("https://app.example").unwrap().join(path).unwrap();
        RequestKey::new(RequestMethod::Get, &url)
    }

    fn make_response(body: &'static [u8]) -> Response {
        Response::new(200).with_body(body)
    }

    #[tokio::test]
    async fn cache_put_and_match() {
        let storage = MemoryCacheStorage::new();
        storage
            .put("v1", key("/style.css"), make_response(b"body{color:red}"))
            .await
            .unwrap();

        let found = storage
            .match_request("v1", &key("/style.css"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(found.body.as_ref(), b"body{color:red}");
        assert_eq!(found.status, 200);
    }

    #[tokio::test]
    async fn match_is_scoped_to_generation() {
        let storage = MemoryCacheStorage::new();
        storage.put("v1", key("/a.js"), make_response(b"a")).await.unwrap();
        storage.put("v2", key("/b.js"), make_response(b"b")).await.unwrap();

        assert!(storage.match_request("v1", &key("/a.js")).await.unwrap().is_some());
        assert!(storage.match_request("v1", &key("/b.js")).await.unwrap().is_none());
        assert!(storage.match_request("v2", &key("/b.js")).await.unwrap().is_some());
        assert!(storage.match_request("v3", &key("/a.js")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn open_creates_empty_generation() {
        let storage = MemoryCacheStorage::new();
        assert!(!storage.has("v1"));
        storage.open("v1").await.unwrap();
        assert!(storage.has("v1"));
        assert_eq!(storage.len("v1"), 0);
        assert_eq!(storage.keys().await.unwrap(), vec!["v1".to_string()]);
    }

    #[tokio::test]
    async fn delete_generation() {
        let storage = MemoryCacheStorage::new();
        storage.put("temp", key("/a"), make_response(b"aaa")).await.unwrap();
        assert!(storage.delete("temp").await.unwrap());
        assert!(!storage.delete("temp").await.unwrap());
        assert!(!storage.has("temp"));
        assert_eq!(storage.usage(), 0);
    }

    #[tokio::test]
    async fn put_replaces_same_key() {
        let storage = MemoryCacheStorage::new();
        storage.put("v1", key("/file"), make_response(b"version1")).await.unwrap();
        storage.put("v1", key("/file"), make_response(b"version2")).await.unwrap();

        assert_eq!(storage.len("v1"), 1);
        let found = storage.match_request("v1", &key("/file")).await.unwrap().unwrap();
        assert_eq!(found.body.as_ref(), b"version2");
        assert_eq!(storage.usage(), 8 + ENTRY_OVERHEAD);
    }

    #[tokio::test]
    async fn quota_rejects_without_evicting() {
        let storage = MemoryCacheStorage::with_quota(ENTRY_OVERHEAD + 4);
        storage.put("v1", key("/a"), make_response(b"aaaa")).await.unwrap();

        let err = storage
            .put("v1", key("/b"), make_response(b"b"))
            .await
            .unwrap_err();
        assert!(matches!(err, CacheError::QuotaExceeded { .. }));
        assert!(storage.match_request("v1", &key("/a")).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn replacing_within_quota_is_allowed() {
        let storage = MemoryCacheStorage::with_quota(ENTRY_OVERHEAD + 4);
        storage.put("v1", key("/a"), make_response(b"aaaa")).await.unwrap();
        storage.put("v1", key("/a"), make_response(b"bbbb")).await.unwrap();
        assert_eq!(storage.len("v1"), 1);
    }

    #[tokio::test]
    async fn put_existing_never_creates_generation() {
        let storage = MemoryCacheStorage::new();
        let written = storage
            .put_existing("v1", key("/late.js"), make_response(b"late"))
            .await
            .unwrap();
        assert!(!written);
        assert!(!storage.has("v1"));
        assert_eq!(storage.usage(), 0);

        storage.open("v1").await.unwrap();
        assert!(storage
            .put_existing("v1", key("/late.js"), make_response(b"late"))
            .await
            .unwrap());
        assert_eq!(storage.len("v1"), 1);
    }

    #[tokio::test]
    async fn put_all_is_all_or_nothing() {
        let storage = MemoryCacheStorage::with_quota(2 * ENTRY_OVERHEAD + 2);
        let entries = vec![
            (key("/"), make_response(b"1")),
            (key("/index.html"), make_response(b"2")),
            (key("/manifest.json"), make_response(b"3")),
        ];

        assert!(storage.put_all("v1", entries).await.is_err());
        assert!(!storage.has("v1"));

        let entries = vec![
            (key("/"), make_response(b"1")),
            (key("/index.html"), make_response(b"2")),
        ];
        storage.put_all("v1", entries).await.unwrap();
        assert_eq!(storage.len("v1"), 2);
    }
}
