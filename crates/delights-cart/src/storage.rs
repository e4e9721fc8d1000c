//! Local key-value storage the cart persists into.
//!
//! Mirrors the page's `localStorage`: string keys, string values, and
//! insertion-independent key order.

use std::path::{Path, PathBuf};

use delights_common::{DelightsError, Result};
use hashbrown::HashMap;
use tracing::debug;

/// A string key-value store.
pub trait LocalStorage {
    fn get_item(&self, key: &str) -> Option<String>;

    fn set_item(&mut self, key: &str, value: &str) -> Result<()>;

    fn remove_item(&mut self, key: &str) -> Result<()>;

    fn clear(&mut self) -> Result<()>;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// The `n`th key in sorted order.
    fn key(&self, n: usize) -> Option<String>;
}

/// Storage that lives only as long as the value.
#[derive(Debug, Default, Clone)]
pub struct MemoryStorage {
    data: HashMap<String, String>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }
}

impl LocalStorage for MemoryStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.data.get(key).cloned()
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        self.data.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        self.data.remove(key);
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.data.clear();
        Ok(())
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn key(&self, n: usize) -> Option<String> {
        sorted_key(&self.data, n)
    }
}

/// Storage written through to a JSON file on every change.
#[derive(Debug)]
pub struct FileStorage {
    path: PathBuf,
    data: HashMap<String, String>,
}

impl FileStorage {
    /// Open the store at `path`. A missing file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let data = match std::fs::read(&path) {
            Ok(raw) => serde_json::from_slice(&raw).map_err(|e| {
                DelightsError::storage_with_source(
                    format!("corrupt storage file {}", path.display()),
                    e,
                )
            })?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => HashMap::new(),
            Err(e) => return Err(e.into()),
        };
        debug!(path = %path.display(), keys = data.len(), "Opened local storage");
        Ok(Self { path, data })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn flush(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let raw = serde_json::to_vec_pretty(&self.data)
            .map_err(|e| DelightsError::storage_with_source("failed to encode storage", e))?;
        std::fs::write(&self.path, raw)?;
        Ok(())
    }
}

impl LocalStorage for FileStorage {
    fn get_item(&self, key: &str) -> Option<String> {
        self.data.get(key).cloned()
    }

    fn set_item(&mut self, key: &str, value: &str) -> Result<()> {
        self.data.insert(key.to_string(), value.to_string());
        self.flush()
    }

    fn remove_item(&mut self, key: &str) -> Result<()> {
        if self.data.remove(key).is_some() {
            self.flush()?;
        }
        Ok(())
    }

    fn clear(&mut self) -> Result<()> {
        self.data.clear();
        self.flush()
    }

    fn len(&self) -> usize {
        self.data.len()
    }

    fn key(&self, n: usize) -> Option<String> {
        sorted_key(&self.data, n)
    }
}

fn sorted_key(data: &HashMap<String, String>, n: usize) -> Option<String> {
    let mut keys: Vec<&String> = data.keys().collect();
    keys.sort_unstable();
    keys.get(n).map(|k| k.to_string())
}
