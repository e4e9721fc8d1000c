//! # Divine Delights Offline Worker
//!
//! Offline support for the storefront, modelled on a cache-first service worker.
//!
//! ## Features
//!
//! - **Cache storage**: named buckets of request → response pairs, persisted as a snapshot
//! - **Lifecycle**: all-or-nothing install, whitelist-based cleanup on activate
//! - **Fetch interception**: cache-first with a configurable miss policy
//! - **Registration**: scoped workers driven through their lifecycle by a host
//!
//! ## Architecture
//!
//! ```text
//! ServiceWorkerContainer (host)
//!     │
//!     └── ServiceWorkerRegistration (per scope)
//!             ├── installing / waiting / active (ServiceWorker)
//!             └── OfflineWorker
//!                     ├── CacheLifecycleManager  (install, activate)
//!                     └── RequestInterceptor     (fetch)
//!
//! CacheStorage
//!     └── Cache (bucket name)
//!             └── URL → CacheEntry
//! ```

use thiserror::Error;

pub mod cache;
pub mod fetch;
pub mod registration;
pub mod worker;

#[cfg(test)]
mod testing;

pub use cache::{Cache, CacheEntry, CacheStorage, SharedCacheStorage};
pub use fetch::{FetchError, FetchRequest, FetchResponse, Fetcher};
pub use registration::{
    RegistrationOptions, ServiceWorker, ServiceWorkerContainer, ServiceWorkerEvent,
    ServiceWorkerId, ServiceWorkerRegistration, ServiceWorkerState,
};
pub use worker::{
    ActivationReport, CacheLifecycleManager, LifecycleState, MissPolicy, OfflineCacheConfig,
    OfflineCacheWorker, OfflineWorker, RequestInterceptor,
};

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerError {
    #[error("Registration failed: {0}")]
    RegistrationFailed(String),

    #[error("Security error: {0}")]
    SecurityError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Install failed fetching {url}: {reason}")]
    InstallFailed { url: String, reason: String },

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ServiceWorkerError {
    /// Whether the host should attempt the operation again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ServiceWorkerError::InstallFailed { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_only_install_failures_are_retryable() {
        let failed = ServiceWorkerError::InstallFailed {
            url: "http://localhost:5000/logo.png".to_string(),
            reason: "HTTP 404 Not Found".to_string(),
        };
        assert!(failed.is_retryable());
        assert!(!ServiceWorkerError::StateError("busy".to_string()).is_retryable());
        assert_eq!(
            failed.to_string(),
            "Install failed fetching http://localhost:5000/logo.png: HTTP 404 Not Found"
        );
    }
}
