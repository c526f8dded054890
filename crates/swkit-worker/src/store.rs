//! Named resource stores and the storage that owns them.
//!
//! Each [`Cache`] is one generation: a key -> [`CacheEntry`] map named by a
//! version tag. [`CacheStorage`] owns every cache, optionally mirrors them to
//! disk, and enforces an optional byte quota.
//!
//! On disk each cache is a directory named by its URL-encoded name, holding
//! one JSON file per entry. Bodies and header values are stored as base64 so
//! they round-trip byte for byte.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use bytes::Bytes;
use hashbrown::HashMap;
use http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode};
use serde::{Deserialize, Serialize};
use swkit_common::Transient;
use swkit_net::{Request, Response, ResponseType};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::{debug, trace, warn};
use url::Url;

/// Resource store errors.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("Cache not found: {0}")]
    StoreMissing(String),

    #[error("Quota exceeded: {requested} bytes requested, {available} available")]
    QuotaExceeded { requested: u64, available: u64 },

    #[error("Invalid entry: {0}")]
    InvalidEntry(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Transient for StoreError {
    fn is_transient(&self) -> bool {
        match self {
            StoreError::Io(e) => e.is_transient(),
            _ => false,
        }
    }
}

mod base64_bytes {
    use base64::engine::general_purpose::STANDARD;
    use base64::Engine;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let text = String::deserialize(deserializer)?;
        STANDARD.decode(text).map_err(serde::de::Error::custom)
    }
}

/// Build the lookup key for a method and URL. Fragments never reach the network
/// and are dropped.
pub fn cache_key(method: &Method, url: &Url) -> String {
    let mut url = url.clone();
    url.set_fragment(None);
    format!("{} {}", method.as_str(), url)
}

fn without_search(url: &Url) -> Url {
    let mut url = url.clone();
    url.set_query(None);
    url.set_fragment(None);
    url
}

fn now_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// One response header as received. The value keeps its raw bytes, which
/// need not be UTF-8.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredHeader {
    pub name: String,
    #[serde(with = "base64_bytes")]
    pub value: Vec<u8>,
}

impl StoredHeader {
    pub fn new(name: impl Into<String>, value: impl AsRef<[u8]>) -> Self {
        Self {
            name: name.into(),
            value: value.as_ref().to_vec(),
        }
    }
}

/// A cached response snapshot. Immutable once stored; a later put for the
/// same key replaces it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response headers, in received order.
    pub headers: Vec<StoredHeader>,

    /// Response body.
    #[serde(with = "base64_bytes")]
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Snapshot a response under the request's key.
    pub fn from_response(request: &Request, response: &Response) -> Self {
        let headers = response
            .headers
            .iter()
            .map(|(name, value)| StoredHeader::new(name.as_str(), value.as_bytes()))
            .collect();

        let mut url = request.url.clone();
        url.set_fragment(None);

        Self {
            url,
            method: request.method.as_str().to_string(),
            status: response.status.as_u16(),
            headers,
            body: response.body.to_vec(),
            cached_at: now_millis(),
        }
    }

    /// Rebuild the stored response.
    pub fn to_response(&self) -> Result<Response, StoreError> {
        let status = StatusCode::from_u16(self.status)
            .map_err(|e| StoreError::InvalidEntry(format!("{}: {}", self.url, e)))?;

        let mut headers = HeaderMap::with_capacity(self.headers.len());
        for header in &self.headers {
            let name = HeaderName::from_bytes(header.name.as_bytes())
                .map_err(|e| StoreError::InvalidEntry(format!("{}: {}", self.url, e)))?;
            let value = HeaderValue::from_bytes(&header.value)
                .map_err(|e| StoreError::InvalidEntry(format!("{}: {}", self.url, e)))?;
            headers.append(name, value);
        }

        Ok(Response {
            url: self.url.clone(),
            status,
            headers,
            body: Bytes::from(self.body.clone()),
            response_type: ResponseType::Basic,
            redirected: false,
        })
    }

    /// Content type header, if stored and readable as text.
    pub fn content_type(&self) -> Option<&str> {
        self.headers
            .iter()
            .find(|h| h.name.eq_ignore_ascii_case("content-type"))
            .and_then(|h| std::str::from_utf8(&h.value).ok())
    }

    fn key(&self) -> String {
        format!("{} {}", self.method, self.url)
    }

    /// Bytes charged against the storage quota.
    pub fn size(&self) -> u64 {
        let headers: usize = self.headers.iter().map(|h| h.name.len() + h.value.len()).sum();
        (self.body.len() + headers + self.url.as_str().len()) as u64
    }
}

/// Options for matching a request against a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatchOptions {
    /// Compare URLs without their query string.
    pub ignore_search: bool,
    /// Match regardless of method.
    pub ignore_method: bool,
}

impl MatchOptions {
    pub fn ignoring_search() -> Self {
        Self {
            ignore_search: true,
            ignore_method: false,
        }
    }
}

/// A cache instance (one generation).
#[derive(Debug, Default)]
pub struct Cache {
    /// Cache name (the version tag).
    pub name: String,

    /// Cached entries.
    entries: HashMap<String, CacheEntry>,

    /// Entry file name on disk, per key.
    files: HashMap<String, String>,

    next_file: u64,
}

impl Cache {
    /// Create a new cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            ..Default::default()
        }
    }

    /// File that holds (or will hold) the entry under `key`.
    fn file_for(&self, key: &str) -> String {
        match self.files.get(key) {
            Some(file) => file.clone(),
            None => format!("{:08}.json", self.next_file),
        }
    }

    fn track_file(&mut self, key: String, file: String) {
        if let Some(n) = file
            .strip_suffix(".json")
            .and_then(|stem| stem.parse::<u64>().ok())
        {
            self.next_file = self.next_file.max(n + 1);
        }
        self.files.insert(key, file);
    }

    /// Match a request. With `ignore_search`, an exact hit wins; otherwise the
    /// lowest URL among query-string variants is returned.
    pub fn match_request(
        &self,
        method: &Method,
        url: &Url,
        options: MatchOptions,
    ) -> Option<&CacheEntry> {
        if let Some(entry) = self.entries.get(&cache_key(method, url)) {
            return Some(entry);
        }
        if !options.ignore_search && !options.ignore_method {
            return None;
        }

        let target = if options.ignore_search {
            without_search(url)
        } else {
            let mut url = url.clone();
            url.set_fragment(None);
            url
        };

        self.entries
            .values()
            .filter(|e| options.ignore_method || e.method == method.as_str())
            .filter(|e| {
                if options.ignore_search {
                    without_search(&e.url) == target
                } else {
                    e.url == target
                }
            })
            .min_by(|a, b| a.url.as_str().cmp(b.url.as_str()))
    }

    /// Store an entry, returning the snapshot it replaced.
    pub fn put(&mut self, entry: CacheEntry) -> Option<CacheEntry> {
        self.entries.insert(entry.key(), entry)
    }

    /// Delete an entry.
    pub fn delete(&mut self, method: &Method, url: &Url) -> bool {
        let key = cache_key(method, url);
        self.files.remove(&key);
        self.entries.remove(&key).is_some()
    }

    /// Get all keys, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(|s| s.as_str()).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn usage(&self) -> u64 {
        self.entries.values().map(CacheEntry::size).sum()
    }
}

/// Cache storage: every named generation, in memory and optionally on disk.
///
/// Only [`CacheStorage::open`] creates a cache. Lookups against a missing
/// cache return `None`; puts into one fail with [`StoreError::StoreMissing`].
#[derive(Debug, Default)]
pub struct CacheStorage {
    caches: RwLock<HashMap<String, Cache>>,
    dir: Option<PathBuf>,
    quota: Option<u64>,
}

impl CacheStorage {
    /// Create storage that lives only in memory.
    pub fn in_memory() -> Self {
        Self::default()
    }

    /// Open disk-backed storage, loading every cache directory in `dir`.
    pub async fn open_dir(dir: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let dir = dir.into();
        tokio::fs::create_dir_all(&dir).await?;

        let mut caches = HashMap::new();
        let mut read_dir = tokio::fs::read_dir(&dir).await?;
        while let Some(item) = read_dir.next_entry().await? {
            if !item.file_type().await?.is_dir() {
                continue;
            }
            let encoded = item.file_name().to_string_lossy().into_owned();
            let name = match urlencoding::decode(&encoded) {
                Ok(name) => name.into_owned(),
                Err(e) => {
                    warn!(dir = %encoded, error = %e, "Skipping cache directory with undecodable name");
                    continue;
                }
            };
            let cache = load_cache(&name, &item.path()).await?;
            debug!(cache = %cache.name, entries = cache.len(), "Loaded cache");
            caches.insert(name, cache);
        }

        Ok(Self {
            caches: RwLock::new(caches),
            dir: Some(dir),
            quota: None,
        })
    }

    /// Limit total stored bytes across all caches.
    pub fn with_quota(mut self, bytes: u64) -> Self {
        self.quota = Some(bytes);
        self
    }

    pub fn quota(&self) -> Option<u64> {
        self.quota
    }

    /// Open a cache, creating it if it doesn't exist.
    pub async fn open(&self, name: &str) -> Result<(), StoreError> {
        let mut caches = self.caches.write().await;
        if caches.contains_key(name) {
            return Ok(());
        }
        if let Some(dir) = self.dir.as_deref() {
            tokio::fs::create_dir_all(dir.join(dir_name(name))).await?;
        }
        caches.insert(name.to_string(), Cache::new(name));
        debug!(cache = %name, "Opened cache");
        Ok(())
    }

    /// Check if cache exists.
    pub async fn has(&self, name: &str) -> bool {
        self.caches.read().await.contains_key(name)
    }

    /// Get all cache names, sorted.
    pub async fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.read().await.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Delete a cache. Its directory goes first so a failed removal leaves
    /// the cache in place for a retry.
    pub async fn delete(&self, name: &str) -> Result<bool, StoreError> {
        let mut caches = self.caches.write().await;
        if !caches.contains_key(name) {
            return Ok(false);
        }
        if let Some(dir) = self.dir.as_deref() {
            match tokio::fs::remove_dir_all(dir.join(dir_name(name))).await {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }
        caches.remove(name);
        debug!(cache = %name, "Deleted cache");
        Ok(true)
    }

    /// Match a request in the named cache. A missing cache behaves as empty.
    pub async fn match_request(
        &self,
        name: &str,
        method: &Method,
        url: &Url,
        options: MatchOptions,
    ) -> Option<CacheEntry> {
        let caches = self.caches.read().await;
        let hit = caches
            .get(name)?
            .match_request(method, url, options)
            .cloned();
        trace!(cache = %name, url = %url, hit = hit.is_some(), "Cache lookup");
        hit
    }

    /// Store an entry in the named cache, replacing any entry under its key.
    pub async fn put(&self, name: &str, entry: CacheEntry) -> Result<(), StoreError> {
        let mut caches = self.caches.write().await;
        let usage: u64 = caches.values().map(Cache::usage).sum();

        let cache = caches
            .get_mut(name)
            .ok_or_else(|| StoreError::StoreMissing(name.to_string()))?;

        if let Some(quota) = self.quota {
            let freed = cache.entries.get(&entry.key()).map_or(0, CacheEntry::size);
            let available = quota.saturating_sub(usage - freed);
            if entry.size() > available {
                return Err(StoreError::QuotaExceeded {
                    requested: entry.size(),
                    available,
                });
            }
        }

        // Only the one entry file is written; memory changes after it lands.
        let key = entry.key();
        let file = cache.file_for(&key);
        if let Some(dir) = self.dir.as_deref() {
            write_entry_file(&dir.join(dir_name(name)), &file, &entry).await?;
        }
        cache.track_file(key.clone(), file);
        cache.put(entry);

        trace!(cache = %name, key = %key, "Stored entry");
        Ok(())
    }

    /// Enumerate the keys of the named cache.
    pub async fn entries(&self, name: &str) -> Vec<String> {
        self.caches
            .read()
            .await
            .get(name)
            .map(|c| c.keys().into_iter().map(str::to_string).collect())
            .unwrap_or_default()
    }

    /// Total bytes stored across all caches.
    pub async fn usage(&self) -> u64 {
        self.caches.read().await.values().map(Cache::usage).sum()
    }
}

fn dir_name(name: &str) -> String {
    urlencoding::encode(name).into_owned()
}

/// Load one cache directory. Unreadable entry files are skipped.
async fn load_cache(name: &str, path: &Path) -> Result<Cache, StoreError> {
    let mut cache = Cache::new(name);
    let mut read_dir = tokio::fs::read_dir(path).await?;
    while let Some(item) = read_dir.next_entry().await? {
        let file = item.file_name().to_string_lossy().into_owned();
        if !file.ends_with(".json") {
            continue;
        }
        let bytes = tokio::fs::read(item.path()).await?;
        match serde_json::from_slice::<CacheEntry>(&bytes) {
            Ok(entry) => {
                cache.track_file(entry.key(), file);
                cache.put(entry);
            }
            Err(e) => {
                warn!(cache = %name, file = %file, error = %e, "Skipping unreadable cache entry");
            }
        }
    }
    Ok(cache)
}

/// Write one entry file atomically (temp file + rename).
async fn write_entry_file(dir: &Path, file: &str, entry: &CacheEntry) -> Result<(), StoreError> {
    let path = dir.join(file);
    let tmp = dir.join(format!("{}.tmp", file));
    tokio::fs::write(&tmp, serde_json::to_vec(entry)?).await?;
    tokio::fs::rename(&tmp, &path).await?;
    Ok(())
}
