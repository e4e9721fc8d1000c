//! Named cache buckets and the storage that holds them.

use std::path::Path;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use delights_common::{DelightsError, Result};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tracing::debug;

/// Cache storage shared between the lifecycle manager and the interceptor.
pub type SharedCacheStorage = Arc<RwLock<CacheStorage>>;

/// A cached request/response pair.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    /// Request URL.
    pub url: String,

    /// Request method.
    pub method: String,

    /// Response status.
    pub status: u16,

    /// Response status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Cached at timestamp (ms since epoch).
    pub cached_at: u64,
}

impl CacheEntry {
    /// Milliseconds since the epoch, for `cached_at`.
    pub fn now_millis() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// A named cache bucket.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Cache {
    /// Cache name.
    pub name: String,

    entries: HashMap<String, CacheEntry>,
}

impl Cache {
    /// Create a new, empty cache.
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            entries: HashMap::new(),
        }
    }

    /// Match a request. Only an entry stored under the same method matches.
    pub fn match_request(&self, method: &str, url: &str) -> Option<&CacheEntry> {
        self.entries
            .get(url)
            .filter(|entry| entry.method.eq_ignore_ascii_case(method))
    }

    /// Store a single entry, replacing any entry for the same URL.
    pub fn put(&mut self, entry: CacheEntry) {
        self.entries.insert(entry.url.clone(), entry);
    }

    /// Store a batch of entries that were all fetched successfully.
    pub fn put_all(&mut self, entries: impl IntoIterator<Item = CacheEntry>) {
        for entry in entries {
            self.put(entry);
        }
    }

    /// Delete entry.
    pub fn delete(&mut self, url: &str) -> bool {
        self.entries.remove(url).is_some()
    }

    /// All cached URLs, sorted.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        keys.sort_unstable();
        keys
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All cache buckets of one origin.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct CacheStorage {
    caches: HashMap<String, Cache>,
}

impl CacheStorage {
    /// Create new cache storage.
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap this storage for sharing across tasks.
    pub fn shared(self) -> SharedCacheStorage {
        Arc::new(RwLock::new(self))
    }

    /// Open a cache (creates if doesn't exist).
    pub fn open(&mut self, name: &str) -> &mut Cache {
        self.caches
            .entry(name.to_string())
            .or_insert_with(|| Cache::new(name))
    }

    /// Look up a cache without creating it.
    pub fn get(&self, name: &str) -> Option<&Cache> {
        self.caches.get(name)
    }

    /// Check if cache exists.
    pub fn has(&self, name: &str) -> bool {
        self.caches.contains_key(name)
    }

    /// Delete a cache.
    pub fn delete(&mut self, name: &str) -> bool {
        self.caches.remove(name).is_some()
    }

    /// All cache names, sorted.
    pub fn keys(&self) -> Vec<String> {
        let mut names: Vec<String> = self.caches.keys().cloned().collect();
        names.sort_unstable();
        names
    }

    /// Load a snapshot written by [`CacheStorage::save`]. A missing file is empty storage.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = match std::fs::read(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "No cache snapshot, starting empty");
                return Ok(Self::new());
            }
            Err(e) => return Err(e.into()),
        };

        let storage: Self = serde_json::from_slice(&raw).map_err(|e| {
            DelightsError::storage_with_source(
                format!("corrupt cache snapshot {}", path.display()),
                e,
            )
        })?;
        debug!(path = %path.display(), buckets = storage.caches.len(), "Loaded cache snapshot");
        Ok(storage)
    }

    /// Write the whole storage to `path`, creating parent directories.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_vec(self).map_err(|e| {
            DelightsError::storage_with_source("failed to encode cache snapshot", e)
        })?;
        std::fs::write(path, raw)?;
        debug!(path = %path.display(), buckets = self.caches.len(), "Saved cache snapshot");
        Ok(())
    }
}
