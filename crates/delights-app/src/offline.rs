//! Offline cache commands over the persisted cache snapshot.

use std::sync::Arc;

use delights_core::{MissPolicySetting, StorefrontConfig};
use delights_sw::{
    ActivationReport, CacheStorage, FetchRequest, FetchResponse, Fetcher, MissPolicy,
    OfflineCacheConfig, OfflineCacheWorker, RegistrationOptions, RequestInterceptor,
    ServiceWorkerContainer, SharedCacheStorage,
};
use tracing::{debug, info};
use url::Url;

fn miss_policy(setting: MissPolicySetting) -> MissPolicy {
    match setting {
        MissPolicySetting::NetworkOnly => MissPolicy::NetworkOnly,
        MissPolicySetting::WriteThrough => MissPolicy::WriteThrough,
    }
}

fn load_storage(config: &StorefrontConfig) -> anyhow::Result<SharedCacheStorage> {
    Ok(CacheStorage::load(config.cache_snapshot_path())?.shared())
}

async fn save_storage(config: &StorefrontConfig, storage: &SharedCacheStorage) -> anyhow::Result<()> {
    let path = config.cache_snapshot_path();
    storage.read().await.save(&path)?;
    debug!(path = %path.display(), "Saved cache snapshot");
    Ok(())
}

/// Register the worker for `origin`, run install and activate, and persist
/// the resulting caches.
pub async fn precache(
    config: &StorefrontConfig,
    origin: &Url,
    network: Arc<dyn Fetcher>,
) -> anyhow::Result<ActivationReport> {
    let storage = load_storage(config)?;
    let settings = &config.offline;

    let worker = OfflineCacheWorker::new(
        OfflineCacheConfig::new(
            settings.cache_name.clone(),
            settings.manifest.clone(),
            origin.clone(),
        ),
        Arc::clone(&storage),
        Arc::clone(&network),
        miss_policy(settings.miss_policy),
    );

    let (container, mut events) = ServiceWorkerContainer::new(network);
    let script = origin.join(&settings.script_url)?;
    let scope = container
        .register(
            script.as_str(),
            RegistrationOptions {
                scope: Some(settings.scope.clone()),
            },
            Arc::new(worker),
        )
        .await?;

    let report = container.run_lifecycle(scope.as_str()).await;
    while let Ok(event) = events.try_recv() {
        debug!(?event, "Worker event");
    }
    let report = report?;

    save_storage(config, &storage).await?;
    info!(scope = %scope, cache = %settings.cache_name, "Offline cache ready");
    Ok(report)
}

/// Fetch `path` cache-first from the current bucket.
///
/// The bucket only exists in the snapshot once a `precache` of this version
/// has installed and activated it; until then the request is refused.
pub async fn fetch_path(
    config: &StorefrontConfig,
    origin: &Url,
    path: &str,
    network: Arc<dyn Fetcher>,
) -> anyhow::Result<FetchResponse> {
    let storage = load_storage(config)?;
    let bucket = &config.offline.cache_name;
    if !storage.read().await.has(bucket) {
        anyhow::bail!("offline cache '{bucket}' is not installed; run `delights precache` first");
    }
    let cached_before = cached_count(&storage, bucket).await;

    let interceptor = RequestInterceptor::new(bucket.clone(), Arc::clone(&storage), network)
        .with_miss_policy(miss_policy(config.offline.miss_policy));
    let response = interceptor
        .on_fetch(FetchRequest::get(origin.join(path)?))
        .await?;

    if cached_count(&storage, bucket).await != cached_before {
        save_storage(config, &storage).await?;
    }
    Ok(response)
}

async fn cached_count(storage: &SharedCacheStorage, bucket: &str) -> usize {
    storage.read().await.get(bucket).map_or(0, |cache| cache.len())
}
