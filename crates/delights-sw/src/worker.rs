//! Cache lifecycle manager and cache-first request interceptor.
//!
//! The manager seeds one named bucket with the full asset manifest at install
//! time and retires every other bucket at activation time. The interceptor
//! answers requests from that bucket and falls through to the network on a
//! miss. The two share nothing but the bucket name and the storage.

use std::sync::Arc;

use async_trait::async_trait;
use futures::future::{join_all, try_join_all};
use tokio::sync::RwLock;
use tracing::{debug, info, trace, warn};
use url::Url;

use crate::cache::{CacheEntry, SharedCacheStorage};
use crate::fetch::{FetchError, FetchRequest, FetchResponse, Fetcher};
use crate::ServiceWorkerError;

/// Construction-time configuration of one worker version.
#[derive(Debug, Clone, PartialEq)]
pub struct OfflineCacheConfig {
    /// Version-tagged name of the current bucket.
    pub bucket_name: String,

    /// Scope-rooted asset paths, in install order.
    pub manifest: Vec<String>,

    /// Origin the manifest paths resolve against.
    pub origin: Url,
}

impl OfflineCacheConfig {
    pub fn new(bucket_name: impl Into<String>, manifest: Vec<String>, origin: Url) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            manifest,
            origin,
        }
    }

    /// Absolute URLs of every manifest entry.
    pub fn manifest_urls(&self) -> Result<Vec<Url>, ServiceWorkerError> {
        self.manifest
            .iter()
            .map(|path| {
                self.origin.join(path).map_err(|e| {
                    ServiceWorkerError::CacheError(format!("bad manifest entry '{path}': {e}"))
                })
            })
            .collect()
    }

    /// Bucket names that survive activation.
    pub fn whitelist(&self) -> Vec<&str> {
        vec![self.bucket_name.as_str()]
    }
}

/// Lifecycle of the cache manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LifecycleState {
    #[default]
    Uninstalled,
    Installing,
    Installed,
    Activating,
    Active,
}

/// Outcome of an activation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ActivationReport {
    /// Stale buckets that were deleted.
    pub deleted: Vec<String>,

    /// Stale buckets whose deletion failed, with the reason.
    pub failed: Vec<(String, String)>,
}

/// Owns the current bucket's contents across install and activate.
pub struct CacheLifecycleManager {
    config: OfflineCacheConfig,
    storage: SharedCacheStorage,
    network: Arc<dyn Fetcher>,
    state: RwLock<LifecycleState>,
}

impl CacheLifecycleManager {
    pub fn new(
        config: OfflineCacheConfig,
        storage: SharedCacheStorage,
        network: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            config,
            storage,
            network,
            state: RwLock::new(LifecycleState::Uninstalled),
        }
    }

    pub fn config(&self) -> &OfflineCacheConfig {
        &self.config
    }

    pub async fn state(&self) -> LifecycleState {
        *self.state.read().await
    }

    /// Fetch every manifest entry and store them all in the current bucket.
    ///
    /// Entries are committed only when every fetch returned a 2xx response.
    /// On failure the manager returns to `Uninstalled` and install may be
    /// attempted again.
    pub async fn install(&self) -> Result<(), ServiceWorkerError> {
        {
            let mut state = self.state.write().await;
            match *state {
                LifecycleState::Uninstalled => *state = LifecycleState::Installing,
                LifecycleState::Installing => {
                    return Err(ServiceWorkerError::StateError(format!(
                        "install of '{}' already in progress",
                        self.config.bucket_name
                    )));
                }
                _ => {
                    debug!(bucket = %self.config.bucket_name, "Already installed");
                    return Ok(());
                }
            }
        }

        let result = self.populate().await;

        let mut state = self.state.write().await;
        match result {
            Ok(count) => {
                *state = LifecycleState::Installed;
                info!(bucket = %self.config.bucket_name, entries = count, "Offline cache installed");
                Ok(())
            }
            Err(e) => {
                *state = LifecycleState::Uninstalled;
                warn!(bucket = %self.config.bucket_name, error = %e, "Offline cache install failed");
                Err(e)
            }
        }
    }

    async fn populate(&self) -> Result<usize, ServiceWorkerError> {
        let urls = self.config.manifest_urls()?;

        self.storage.write().await.open(&self.config.bucket_name);
        debug!(bucket = %self.config.bucket_name, "Opened cache");

        let entries: Vec<CacheEntry> =
            try_join_all(urls.into_iter().map(|url| self.fetch_for_install(url))).await?;

        let count = entries.len();
        self.storage
            .write()
            .await
            .open(&self.config.bucket_name)
            .put_all(entries);
        Ok(count)
    }

    async fn fetch_for_install(&self, url: Url) -> Result<CacheEntry, ServiceWorkerError> {
        let request = FetchRequest::get(url);
        trace!(url = %request.url, "Fetching manifest entry");

        let response =
            self.network
                .fetch(&request)
                .await
                .map_err(|e| ServiceWorkerError::InstallFailed {
                    url: request.url.to_string(),
                    reason: e.to_string(),
                })?;

        if !response.ok() {
            return Err(ServiceWorkerError::InstallFailed {
                url: request.url.to_string(),
                reason: format!("HTTP {} {}", response.status, response.status_text),
            });
        }

        Ok(response.to_cache_entry(&request))
    }

    /// Delete every bucket not on the whitelist.
    ///
    /// A failed deletion is recorded in the report and does not stop the
    /// others. Deleting nothing is not an error.
    pub async fn activate(&self) -> Result<ActivationReport, ServiceWorkerError> {
        {
            let mut state = self.state.write().await;
            match *state {
                LifecycleState::Installed => *state = LifecycleState::Activating,
                LifecycleState::Active => return Ok(ActivationReport::default()),
                other => {
                    return Err(ServiceWorkerError::StateError(format!(
                        "cannot activate from {other:?}"
                    )));
                }
            }
        }

        let whitelist = self.config.whitelist();
        let stale: Vec<String> = self
            .storage
            .read()
            .await
            .keys()
            .into_iter()
            .filter(|name| !whitelist.contains(&name.as_str()))
            .collect();

        let outcomes = join_all(stale.into_iter().map(|name| async move {
            let removed = self.storage.write().await.delete(&name);
            (name, removed)
        }))
        .await;

        let mut report = ActivationReport::default();
        for (name, removed) in outcomes {
            if removed {
                info!(bucket = %name, "Deleted stale cache");
                report.deleted.push(name);
            } else {
                warn!(bucket = %name, "Stale cache vanished before deletion");
                report
                    .failed
                    .push((name, "bucket no longer exists".to_string()));
            }
        }

        *self.state.write().await = LifecycleState::Active;
        info!(
            bucket = %self.config.bucket_name,
            deleted = report.deleted.len(),
            failed = report.failed.len(),
            "Offline cache active"
        );
        Ok(report)
    }
}

/// What to do with a network response after a cache miss.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MissPolicy {
    /// Return it unmodified; the bucket only grows at install time.
    #[default]
    NetworkOnly,
    /// Also store successful GET responses in the current bucket.
    WriteThrough,
}

/// Cache-first read-through over the current bucket.
pub struct RequestInterceptor {
    bucket_name: String,
    storage: SharedCacheStorage,
    network: Arc<dyn Fetcher>,
    miss_policy: MissPolicy,
}

impl RequestInterceptor {
    pub fn new(
        bucket_name: impl Into<String>,
        storage: SharedCacheStorage,
        network: Arc<dyn Fetcher>,
    ) -> Self {
        Self {
            bucket_name: bucket_name.into(),
            storage,
            network,
            miss_policy: MissPolicy::NetworkOnly,
        }
    }

    pub fn with_miss_policy(mut self, policy: MissPolicy) -> Self {
        self.miss_policy = policy;
        self
    }

    pub fn miss_policy(&self) -> MissPolicy {
        self.miss_policy
    }

    /// Answer from the bucket when possible, otherwise issue exactly one network call.
    pub async fn on_fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let key = request.cache_key();

        let hit = self
            .storage
            .read()
            .await
            .get(&self.bucket_name)
            .and_then(|cache| cache.match_request(&request.method, &key))
            .map(FetchResponse::from_cache);

        if let Some(response) = hit {
            trace!(url = %key, "Cache hit");
            return Ok(response);
        }

        debug!(url = %key, method = %request.method, "Cache miss, fetching from network");
        let response = self.network.fetch(&request).await?;

        if self.miss_policy == MissPolicy::WriteThrough && request.is_get() && response.ok() {
            debug!(url = %key, bucket = %self.bucket_name, "Storing network response");
            self.storage
                .write()
                .await
                .open(&self.bucket_name)
                .put(response.to_cache_entry(&request));
        }

        Ok(response)
    }
}

/// Entry points the host drives: install, activate, then fetch events.
#[async_trait]
pub trait OfflineWorker: Send + Sync {
    /// Identity of this worker version. Registering the same script with a
    /// different version installs it as an update.
    fn version(&self) -> &str;

    async fn on_install(&self) -> Result<(), ServiceWorkerError>;

    async fn on_activate(&self) -> Result<ActivationReport, ServiceWorkerError>;

    async fn on_fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError>;
}

/// The storefront's offline worker.
pub struct OfflineCacheWorker {
    lifecycle: CacheLifecycleManager,
    interceptor: RequestInterceptor,
}

impl OfflineCacheWorker {
    pub fn new(
        config: OfflineCacheConfig,
        storage: SharedCacheStorage,
        network: Arc<dyn Fetcher>,
        miss_policy: MissPolicy,
    ) -> Self {
        let interceptor = RequestInterceptor::new(
            config.bucket_name.clone(),
            Arc::clone(&storage),
            Arc::clone(&network),
        )
        .with_miss_policy(miss_policy);

        Self {
            lifecycle: CacheLifecycleManager::new(config, storage, network),
            interceptor,
        }
    }

    pub fn lifecycle(&self) -> &CacheLifecycleManager {
        &self.lifecycle
    }

    pub fn interceptor(&self) -> &RequestInterceptor {
        &self.interceptor
    }
}

#[async_trait]
impl OfflineWorker for OfflineCacheWorker {
    fn version(&self) -> &str {
        &self.lifecycle.config().bucket_name
    }

    async fn on_install(&self) -> Result<(), ServiceWorkerError> {
        self.lifecycle.install().await
    }

    async fn on_activate(&self) -> Result<ActivationReport, ServiceWorkerError> {
        self.lifecycle.activate().await
    }

    async fn on_fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        self.interceptor.on_fetch(request).await
    }
}
