//! In-memory network double for unit tests.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;

use crate::fetch::{FetchError, FetchRequest, FetchResponse, Fetcher};

/// Serves canned responses by path and counts every call.
pub(crate) struct ScriptedNetwork {
    routes: Mutex<HashMap<String, (u16, Vec<u8>)>>,
    offline: bool,
    latency: Mutex<Duration>,
    calls: AtomicUsize,
}

impl ScriptedNetwork {
    pub(crate) fn new() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            offline: false,
            latency: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn offline() -> Arc<Self> {
        Arc::new(Self {
            routes: Mutex::new(HashMap::new()),
            offline: true,
            latency: Mutex::new(Duration::ZERO),
            calls: AtomicUsize::new(0),
        })
    }

    pub(crate) fn serve(self: Arc<Self>, path: &str, status: u16, body: &str) -> Arc<Self> {
        self.add_route(path, status, body);
        self
    }

    /// Delay every response by `latency`.
    pub(crate) fn with_latency(self: Arc<Self>, latency: Duration) -> Arc<Self> {
        *self.latency.lock().unwrap() = latency;
        self
    }

    pub(crate) fn add_route(&self, path: &str, status: u16, body: &str) {
        self.routes
            .lock()
            .unwrap()
            .insert(path.to_string(), (status, body.as_bytes().to_vec()));
    }

    pub(crate) fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Fetcher for ScriptedNetwork {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let latency = *self.latency.lock().unwrap();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if self.offline {
            return Err(FetchError::Network("offline".to_string()));
        }

        let route = self.routes.lock().unwrap().get(request.url.path()).cloned();
        let (status, body) = route.unwrap_or((404, b"Not Found".to_vec()));
        Ok(FetchResponse {
            url: request.url.to_string(),
            status,
            status_text: if status == 200 { "OK" } else { "Not Found" }.to_string(),
            headers: HashMap::new(),
            body,
            from_cache: false,
        })
    }
}
