//! Worker registration and the host side of the lifecycle.
//!
//! The container plays the part of the browser: it keeps one registration per
//! scope, drives install (retrying on failure) and activate, and routes every
//! request under an active scope through that scope's worker.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use delights_common::{retry_with_backoff_if, RetryConfig};
use hashbrown::HashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, info, warn};
use url::Url;

use crate::fetch::{FetchError, FetchRequest, FetchResponse, Fetcher};
use crate::worker::{ActivationReport, OfflineWorker};
use crate::ServiceWorkerError;

/// Unique identifier for a service worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ServiceWorkerId(u64);

impl ServiceWorkerId {
    fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(1);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Service worker state, as the host sees it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ServiceWorkerState {
    /// Registered, install not started.
    #[default]
    Parsed,
    /// Installing (install event).
    Installing,
    /// Installed but waiting for activation.
    Installed,
    /// Activating (activate event).
    Activating,
    /// Active and controlling pages.
    Activated,
    /// Replaced, unregistered, or install gave up.
    Redundant,
}

/// A service worker instance.
#[derive(Clone)]
pub struct ServiceWorker {
    /// Unique ID.
    pub id: ServiceWorkerId,

    /// Script URL.
    pub script_url: Url,

    /// Current state.
    pub state: ServiceWorkerState,

    /// Error message if install failed.
    pub error: Option<String>,

    /// Time of last state change.
    pub state_changed_at: Instant,

    handle: Arc<dyn OfflineWorker>,
}

impl fmt::Debug for ServiceWorker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceWorker")
            .field("id", &self.id)
            .field("script_url", &self.script_url.as_str())
            .field("state", &self.state)
            .field("error", &self.error)
            .finish()
    }
}

impl ServiceWorker {
    /// Create a new service worker.
    pub fn new(script_url: Url, handle: Arc<dyn OfflineWorker>) -> Self {
        Self {
            id: ServiceWorkerId::new(),
            script_url,
            state: ServiceWorkerState::Parsed,
            error: None,
            state_changed_at: Instant::now(),
            handle,
        }
    }

    /// Set state.
    pub fn set_state(&mut self, state: ServiceWorkerState) {
        self.state = state;
        self.state_changed_at = Instant::now();
    }
}

/// Options for service worker registration.
#[derive(Debug, Clone, Default)]
pub struct RegistrationOptions {
    /// Scope URL. Defaults to the directory of the script.
    pub scope: Option<String>,
}

/// A service worker registration.
#[derive(Debug)]
pub struct ServiceWorkerRegistration {
    /// Scope URL.
    pub scope: Url,

    /// Installing worker.
    pub installing: Option<ServiceWorker>,

    /// Waiting worker (installed but not active).
    pub waiting: Option<ServiceWorker>,

    /// Active worker.
    pub active: Option<ServiceWorker>,
}

impl ServiceWorkerRegistration {
    /// Create a new registration.
    pub fn new(scope: Url) -> Self {
        Self {
            scope,
            installing: None,
            waiting: None,
            active: None,
        }
    }

    /// Get the active worker.
    pub fn get_active(&self) -> Option<&ServiceWorker> {
        self.active.as_ref()
    }

    /// Whether `url` falls under this registration's scope.
    pub fn controls(&self, url: &Url) -> bool {
        url.as_str().starts_with(self.scope.as_str())
    }

    /// Replace the installing worker with a new one.
    pub fn update(&mut self, worker: ServiceWorker) {
        if let Some(mut previous) = self.installing.replace(worker) {
            previous.set_state(ServiceWorkerState::Redundant);
        }
    }

    /// Transition installing to waiting.
    pub fn install_complete(&mut self) {
        if let Some(mut worker) = self.installing.take() {
            worker.set_state(ServiceWorkerState::Installed);
            if let Some(mut replaced) = self.waiting.replace(worker) {
                replaced.set_state(ServiceWorkerState::Redundant);
            }
        }
    }

    /// Drop the installing worker after install gave up.
    pub fn install_failed(&mut self, error: &ServiceWorkerError) -> Option<ServiceWorker> {
        self.installing.take().map(|mut worker| {
            worker.error = Some(error.to_string());
            worker.set_state(ServiceWorkerState::Redundant);
            worker
        })
    }

    /// Promote the waiting worker to active.
    pub fn activate(&mut self) {
        if let Some(mut worker) = self.waiting.take() {
            if let Some(mut old) = self.active.take() {
                old.set_state(ServiceWorkerState::Redundant);
            }

            worker.set_state(ServiceWorkerState::Activated);
            self.active = Some(worker);
        }
    }

    /// Unregister (mark every worker redundant).
    pub fn unregister(&mut self) {
        for slot in [&mut self.active, &mut self.waiting, &mut self.installing] {
            if let Some(mut worker) = slot.take() {
                worker.set_state(ServiceWorkerState::Redundant);
            }
        }
    }
}

/// Service worker events.
#[derive(Debug, Clone, PartialEq)]
pub enum ServiceWorkerEvent {
    /// State changed.
    StateChange {
        registration_scope: String,
        worker_id: ServiceWorkerId,
        new_state: ServiceWorkerState,
    },
    /// A new worker started installing.
    UpdateFound { registration_scope: String },
}

/// Host for registered workers.
pub struct ServiceWorkerContainer {
    /// Registrations by scope.
    registrations: Arc<RwLock<HashMap<String, ServiceWorkerRegistration>>>,

    /// Network used for requests outside every active scope.
    network: Arc<dyn Fetcher>,

    /// How often install is re-attempted before the worker is given up.
    install_retry: RetryConfig,

    /// Event sender for state changes.
    event_tx: mpsc::UnboundedSender<ServiceWorkerEvent>,
}

impl ServiceWorkerContainer {
    /// Create a new container.
    pub fn new(
        network: Arc<dyn Fetcher>,
    ) -> (Self, mpsc::UnboundedReceiver<ServiceWorkerEvent>) {
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        (
            Self {
                registrations: Arc::new(RwLock::new(HashMap::new())),
                network,
                install_retry: RetryConfig::default(),
                event_tx,
            },
            event_rx,
        )
    }

    /// Set how install failures are retried.
    pub fn with_install_retry(mut self, retry: RetryConfig) -> Self {
        self.install_retry = retry;
        self
    }

    /// Register a worker script against a scope and return the scope URL.
    ///
    /// Registering the same script and worker version for a scope that already
    /// has an installing, waiting or active worker for them is a no-op. A new
    /// version of the same script becomes the scope's installing worker.
    pub async fn register(
        &self,
        script_url: &str,
        options: RegistrationOptions,
        worker: Arc<dyn OfflineWorker>,
    ) -> Result<Url, ServiceWorkerError> {
        let script_url = Url::parse(script_url)
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;
        let scope = resolve_scope(&script_url, options.scope.as_deref())?;
        let scope_str = scope.to_string();

        let mut registrations = self.registrations.write().await;
        let registration = registrations
            .entry(scope_str.clone())
            .or_insert_with(|| ServiceWorkerRegistration::new(scope.clone()));

        let already_registered = [
            &registration.installing,
            &registration.waiting,
            &registration.active,
        ]
        .into_iter()
        .flatten()
        .any(|existing| {
            existing.script_url == script_url && existing.handle.version() == worker.version()
        });

        if already_registered {
            debug!(
                scope = %scope_str,
                script = %script_url,
                version = worker.version(),
                "Worker already registered"
            );
            return Ok(scope);
        }

        info!(
            scope = %scope_str,
            script = %script_url,
            version = worker.version(),
            "Registering worker"
        );
        registration.update(ServiceWorker::new(script_url, worker));

        let _ = self.event_tx.send(ServiceWorkerEvent::UpdateFound {
            registration_scope: scope_str,
        });

        Ok(scope)
    }

    /// Drive the installing worker of `scope` through install and activate.
    pub async fn run_lifecycle(&self, scope: &str) -> Result<ActivationReport, ServiceWorkerError> {
        let (worker_id, handle) = {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(scope)
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
            let worker = registration.installing.as_mut().ok_or_else(|| {
                ServiceWorkerError::StateError(format!("no installing worker for {scope}"))
            })?;
            worker.set_state(ServiceWorkerState::Installing);
            (worker.id, Arc::clone(&worker.handle))
        };
        self.emit_state(scope, worker_id, ServiceWorkerState::Installing);

        let installed = retry_with_backoff_if(
            &self.install_retry,
            || handle.on_install(),
            ServiceWorkerError::is_retryable,
        )
        .await;

        if let Err(e) = installed {
            warn!(scope, error = %e, "Install gave up");
            if let Some(registration) = self.registrations.write().await.get_mut(scope) {
                registration.install_failed(&e);
            }
            self.emit_state(scope, worker_id, ServiceWorkerState::Redundant);
            return Err(e);
        }

        self.transition(scope, worker_id, ServiceWorkerState::Installed, |r| {
            r.install_complete();
            r.waiting.as_mut()
        })
        .await?;
        self.transition(scope, worker_id, ServiceWorkerState::Activating, |r| {
            r.waiting.as_mut()
        })
        .await?;

        let report = handle.on_activate().await?;

        self.transition(scope, worker_id, ServiceWorkerState::Activated, |r| {
            r.activate();
            r.active.as_mut()
        })
        .await?;

        info!(scope, deleted = report.deleted.len(), "Worker activated");
        Ok(report)
    }

    async fn transition<F>(
        &self,
        scope: &str,
        worker_id: ServiceWorkerId,
        state: ServiceWorkerState,
        select: F,
    ) -> Result<(), ServiceWorkerError>
    where
        F: FnOnce(&mut ServiceWorkerRegistration) -> Option<&mut ServiceWorker>,
    {
        {
            let mut registrations = self.registrations.write().await;
            let registration = registrations
                .get_mut(scope)
                .ok_or_else(|| ServiceWorkerError::NotFound(scope.to_string()))?;
            match select(registration) {
                Some(worker) if worker.id == worker_id => worker.set_state(state),
                _ => {
                    return Err(ServiceWorkerError::StateError(format!(
                        "worker for {scope} was replaced during its lifecycle"
                    )));
                }
            }
        }
        self.emit_state(scope, worker_id, state);
        Ok(())
    }

    fn emit_state(&self, scope: &str, worker_id: ServiceWorkerId, new_state: ServiceWorkerState) {
        let _ = self.event_tx.send(ServiceWorkerEvent::StateChange {
            registration_scope: scope.to_string(),
            worker_id,
            new_state,
        });
    }

    /// Get the scope of the registration controlling `url`.
    pub async fn get_registration(&self, url: &str) -> Option<String> {
        let url = Url::parse(url).ok()?;
        let registrations = self.registrations.read().await;
        let scope = longest_matching_scope(&registrations, &url, |_| true);
        scope
    }

    /// Get all registration scopes.
    pub async fn get_registrations(&self) -> Vec<String> {
        let mut scopes: Vec<String> = self.registrations.read().await.keys().cloned().collect();
        scopes.sort_unstable();
        scopes
    }

    /// State of the newest worker of `scope`.
    pub async fn worker_state(&self, scope: &str) -> Option<ServiceWorkerState> {
        let registrations = self.registrations.read().await;
        let registration = registrations.get(scope)?;
        registration
            .installing
            .as_ref()
            .or(registration.waiting.as_ref())
            .or(registration.active.as_ref())
            .map(|w| w.state)
    }

    /// Route a request through the active worker whose scope covers it.
    pub async fn handle_fetch(&self, request: FetchRequest) -> Result<FetchResponse, FetchError> {
        let handle = {
            let registrations = self.registrations.read().await;
            let handle = longest_matching_scope(&registrations, &request.url, |r| {
                r.active.is_some()
            })
            .and_then(|scope| registrations.get(&scope))
            .and_then(|r| r.get_active())
            .map(|w| Arc::clone(&w.handle));
            handle
        };

        match handle {
            Some(worker) => worker.on_fetch(request).await,
            None => {
                debug!(url = %request.url, "Not controlled, going to network");
                self.network.fetch(&request).await
            }
        }
    }

    /// Unregister a service worker.
    pub async fn unregister(&self, scope: &str) -> bool {
        let mut registrations = self.registrations.write().await;
        match registrations.remove(scope) {
            Some(mut registration) => {
                registration.unregister();
                info!(scope, "Unregistered worker");
                true
            }
            None => false,
        }
    }
}

fn longest_matching_scope<P>(
    registrations: &HashMap<String, ServiceWorkerRegistration>,
    url: &Url,
    predicate: P,
) -> Option<String>
where
    P: Fn(&ServiceWorkerRegistration) -> bool,
{
    registrations
        .iter()
        .filter(|(_, r)| r.controls(url) && predicate(r))
        .max_by_key(|(scope, _)| scope.len())
        .map(|(scope, _)| scope.clone())
}

/// Resolve the scope of a registration. The scope must share the script's
/// origin and may not reach above the script's directory.
fn resolve_scope(script_url: &Url, scope: Option<&str>) -> Result<Url, ServiceWorkerError> {
    let max_scope = script_url
        .join("./")
        .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?;

    let scope = match scope {
        Some(s) => script_url
            .join(s)
            .map_err(|e| ServiceWorkerError::RegistrationFailed(e.to_string()))?,
        None => max_scope.clone(),
    };

    if scope.origin() != script_url.origin() {
        return Err(ServiceWorkerError::SecurityError(format!(
            "scope {scope} is not same-origin with {script_url}"
        )));
    }
    if !scope.path().starts_with(max_scope.path()) {
        return Err(ServiceWorkerError::SecurityError(format!(
            "scope {scope} is outside the maximum scope {max_scope}"
        )));
    }
    Ok(scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheStorage, SharedCacheStorage};
    use crate::testing::ScriptedNetwork;
    use crate::worker::{MissPolicy, OfflineCacheConfig, OfflineCacheWorker};

    fn worker(network: Arc<ScriptedNetwork>, manifest: &[&str]) -> Arc<dyn OfflineWorker> {
        versioned_worker(
            network,
            CacheStorage::new().shared(),
            "divine-delights-cache-v1",
            manifest,
        )
    }

    fn versioned_worker(
        network: Arc<ScriptedNetwork>,
        storage: SharedCacheStorage,
        bucket: &str,
        manifest: &[&str],
    ) -> Arc<dyn OfflineWorker> {
        let config = OfflineCacheConfig::new(
            bucket,
            manifest.iter().map(|s| s.to_string()).collect(),
            Url::parse("http://localhost:5000").unwrap(),
        );
        Arc::new(OfflineCacheWorker::new(
            config,
            storage,
            network,
            MissPolicy::NetworkOnly,
        ))
    }

    #[test]
    fn test_default_scope_is_script_directory() {
        let script = Url::parse("http://localhost:5000/public/sw.js").unwrap();
        let scope = resolve_scope(&script, None).unwrap();
        assert_eq!(scope.as_str(), "http://localhost:5000/public/");
    }

    #[test]
    fn test_scope_above_script_is_rejected() {
        let script = Url::parse("http://localhost:5000/public/sw.js").unwrap();
        assert!(matches!(
            resolve_scope(&script, Some("/")),
            Err(ServiceWorkerError::SecurityError(_))
        ));
        assert!(resolve_scope(&script, Some("/public/cakes/")).is_ok());
    }

    #[test]
    fn test_cross_origin_scope_is_rejected() {
        let script = Url::parse("http://localhost:5000/sw.js").unwrap();
        assert!(matches!(
            resolve_scope(&script, Some("http://evil.example/")),
            Err(ServiceWorkerError::SecurityError(_))
        ));
    }

    #[tokio::test]
    async fn test_register_and_run_lifecycle() {
        let network = ScriptedNetwork::new().serve("/index.html", 200, "home");
        let (container, mut events) = ServiceWorkerContainer::new(network.clone());

        let scope = container
            .register(
                "http://localhost:5000/sw.js",
                RegistrationOptions::default(),
                worker(network.clone(), &["/index.html"]),
            )
            .await
            .unwrap();
        assert_eq!(scope.as_str(), "http://localhost:5000/");

        container.run_lifecycle(scope.as_str()).await.unwrap();
        assert_eq!(
            container.worker_state(scope.as_str()).await,
            Some(ServiceWorkerState::Activated)
        );

        let mut states = Vec::new();
        while let Ok(event) = events.try_recv() {
            if let ServiceWorkerEvent::StateChange { new_state, .. } = event {
                states.push(new_state);
            }
        }
        assert_eq!(
            states,
            vec![
                ServiceWorkerState::Installing,
                ServiceWorkerState::Installed,
                ServiceWorkerState::Activating,
                ServiceWorkerState::Activated,
            ]
        );
    }

    #[tokio::test]
    async fn test_duplicate_registration_is_deduplicated() {
        let network = ScriptedNetwork::new();
        let (container, mut events) = ServiceWorkerContainer::new(network.clone());

        for _ in 0..2 {
            container
                .register(
                    "http://localhost:5000/sw.js",
                    RegistrationOptions::default(),
                    worker(network.clone(), &[]),
                )
                .await
                .unwrap();
        }

        let mut updates = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ServiceWorkerEvent::UpdateFound { .. }) {
                updates += 1;
            }
        }
        assert_eq!(updates, 1);
        assert_eq!(container.get_registrations().await.len(), 1);
    }

    #[tokio::test]
    async fn test_new_version_of_same_script_replaces_old() {
        let network = ScriptedNetwork::new().serve("/index.html", 200, "home");
        let storage = CacheStorage::new().shared();
        let (container, mut events) = ServiceWorkerContainer::new(network.clone());

        let scope = container
            .register(
                "http://localhost:5000/sw.js",
                RegistrationOptions::default(),
                versioned_worker(network.clone(), storage.clone(), "v1", &["/index.html"]),
            )
            .await
            .unwrap();
        container.run_lifecycle(scope.as_str()).await.unwrap();

        container
            .register(
                "http://localhost:5000/sw.js",
                RegistrationOptions::default(),
                versioned_worker(network.clone(), storage.clone(), "v2", &["/index.html"]),
            )
            .await
            .unwrap();
        let report = container.run_lifecycle(scope.as_str()).await.unwrap();

        assert_eq!(report.deleted, vec!["v1"]);
        assert_eq!(storage.read().await.keys(), vec!["v2"]);
        assert_eq!(
            container.worker_state(scope.as_str()).await,
            Some(ServiceWorkerState::Activated)
        );

        let mut updates = 0;
        while let Ok(event) = events.try_recv() {
            if matches!(event, ServiceWorkerEvent::UpdateFound { .. }) {
                updates += 1;
            }
        }
        assert_eq!(updates, 2);
    }

    #[tokio::test]
    async fn test_failed_install_is_retried_then_redundant() {
        let network = ScriptedNetwork::new();
        let (container, _events) = ServiceWorkerContainer::new(network.clone());
        let container = container.with_install_retry(RetryConfig::immediate(3));

        let scope = container
            .register(
                "http://localhost:5000/sw.js",
                RegistrationOptions::default(),
                worker(network.clone(), &["/missing.png"]),
            )
            .await
            .unwrap();

        let result = container.run_lifecycle(scope.as_str()).await;
        assert!(matches!(
            result,
            Err(ServiceWorkerError::InstallFailed { .. })
        ));
        assert_eq!(network.calls(), 3);
        assert_eq!(container.worker_state(scope.as_str()).await, None);
    }

    #[tokio::test]
    async fn test_handle_fetch_outside_scope_goes_to_network() {
        let network = ScriptedNetwork::new().serve("/public/index.html", 200, "page");
        let (container, _events) = ServiceWorkerContainer::new(network.clone());

        let scope = container
            .register(
                "http://localhost:5000/public/sw.js",
                RegistrationOptions::default(),
                worker(network.clone(), &["/public/index.html"]),
            )
            .await
            .unwrap();
        container.run_lifecycle(scope.as_str()).await.unwrap();
        let before = network.calls();

        let inside = container
            .handle_fetch(FetchRequest::parse("http://localhost:5000/public/index.html").unwrap())
            .await
            .unwrap();
        assert!(inside.from_cache);
        assert_eq!(network.calls(), before);

        let outside = container
            .handle_fetch(FetchRequest::parse("http://localhost:5000/api/products").unwrap())
            .await
            .unwrap();
        assert!(!outside.from_cache);
        assert_eq!(network.calls(), before + 1);
    }

    #[tokio::test]
    async fn test_get_registration_and_unregister() {
        let network = ScriptedNetwork::new();
        let (container, _events) = ServiceWorkerContainer::new(network.clone());
        let scope = container
            .register(
                "http://localhost:5000/sw.js",
                RegistrationOptions::default(),
                worker(network, &[]),
            )
            .await
            .unwrap();

        assert_eq!(
            container
                .get_registration("http://localhost:5000/cakes.html")
                .await,
            Some(scope.to_string())
        );

        assert!(container.unregister(scope.as_str()).await);
        assert!(!container.unregister(scope.as_str()).await);
        assert!(container.get_registrations().await.is_empty());
    }
}
