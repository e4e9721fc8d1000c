//! Storefront configuration

use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{CoreError, CoreResult};

/// Version-tagged name of the current offline cache bucket.
///
/// Bumping this string is the only way to retire a previously installed bucket.
pub const CACHE_NAME: &str = "divine-delights-cache-v1";

/// Every asset the storefront needs to render while offline.
pub const DEFAULT_MANIFEST: &[&str] = &[
    "/",
    // Pages
    "/index.html",
    "/breads.html",
    "/pastries.html",
    "/cakes.html",
    "/about.html",
    "/contact.html",
    // Core assets
    "/styles.css",
    "/manifest.json",
    // Scripts
    "/scripts/cart.js",
    "/scripts/components.js",
    "/scripts/main.js",
    // Images and icons
    "/images/logo.png",
    "/images/hero-background.jpg",
    "/images/carousel-cake-1.jpg",
    "/images/carousel-cake-2.jpg",
    "/images/carousel-cake-3.jpg",
    "/images/product-1.jpg",
    "/images/product-2.jpg",
    "/images/product-3.jpg",
    "/images/icons/icon-192x192.png",
    "/images/icons/icon-512x512.png",
];

/// Storefront configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorefrontConfig {
    /// Address the HTTP server binds to
    pub bind_address: IpAddr,

    /// Port the HTTP server listens on
    pub port: u16,

    /// Directory holding the static site
    pub public_dir: PathBuf,

    /// Directory holding the offline cache snapshot
    pub cache_dir: PathBuf,

    /// Offline cache settings
    pub offline: OfflineSettings,
}

/// What the request interceptor does with a network response after a cache miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MissPolicySetting {
    /// Return the network response without storing it.
    #[default]
    NetworkOnly,
    /// Store successful GET responses in the current bucket.
    WriteThrough,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OfflineSettings {
    /// Name of the current cache bucket
    pub cache_name: String,

    /// Scope-rooted asset paths cached at install time
    pub manifest: Vec<String>,

    /// Path of the worker script
    pub script_url: String,

    /// Path prefix of the pages the worker controls
    pub scope: String,

    /// Cache miss handling
    pub miss_policy: MissPolicySetting,
}

impl Default for StorefrontConfig {
    fn default() -> Self {
        Self {
            bind_address: IpAddr::from([127, 0, 0, 1]),
            port: 5000,
            public_dir: PathBuf::from("public"),
            cache_dir: dirs::cache_dir()
                .unwrap_or_else(|| PathBuf::from("."))
                .join("divine-delights"),
            offline: OfflineSettings::default(),
        }
    }
}

impl Default for OfflineSettings {
    fn default() -> Self {
        Self {
            cache_name: CACHE_NAME.to_string(),
            manifest: DEFAULT_MANIFEST.iter().map(|s| s.to_string()).collect(),
            script_url: "/sw.js".to_string(),
            scope: "/".to_string(),
            miss_policy: MissPolicySetting::NetworkOnly,
        }
    }
}

impl StorefrontConfig {
    /// Load configuration from a JSON file. Missing fields take their defaults.
    pub fn load(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        log::debug!("Loading storefront config from {}", path.display());

        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Load configuration from `path` if given, otherwise use defaults.
    pub fn load_or_default(path: Option<&Path>) -> CoreResult<Self> {
        match path {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    /// Path of the offline cache snapshot file.
    pub fn cache_snapshot_path(&self) -> PathBuf {
        self.cache_dir.join("caches.json")
    }

    /// Path of the local storage file the cart lives in.
    pub fn local_storage_path(&self) -> PathBuf {
        self.cache_dir.join("local-storage.json")
    }

    /// Origin the server is reachable at, e.g. `http://127.0.0.1:5000`.
    pub fn local_origin(&self) -> String {
        format!("http://{}", SocketAddr::new(self.bind_address, self.port))
    }

    /// Check the configuration for values the storefront cannot run with.
    pub fn validate(&self) -> CoreResult<()> {
        if self.port == 0 {
            return Err(CoreError::config("port must be non-zero"));
        }
        self.offline.validate()
    }
}

impl OfflineSettings {
    pub fn validate(&self) -> CoreResult<()> {
        if self.cache_name.trim().is_empty() {
            return Err(CoreError::config("cache name must not be empty"));
        }
        if !self.scope.starts_with('/') {
            return Err(CoreError::config(format!(
                "scope '{}' must start with '/'",
                self.scope
            )));
        }
        if !self.script_url.starts_with('/') {
            return Err(CoreError::config(format!(
                "script url '{}' must start with '/'",
                self.script_url
            )));
        }

        let mut seen = HashSet::new();
        for entry in &self.manifest {
            if !entry.starts_with('/') {
                return Err(CoreError::config(format!(
                    "manifest entry '{entry}' must be scope-rooted"
                )));
            }
            if !seen.insert(entry.as_str()) {
                return Err(CoreError::config(format!(
                    "manifest entry '{entry}' is listed twice"
                )));
            }
        }
        Ok(())
    }
}
