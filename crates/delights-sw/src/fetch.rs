//! Requests, responses and the network seam used by the worker.

use std::time::Duration;

use async_trait::async_trait;
use hashbrown::HashMap;
use thiserror::Error;
use url::Url;

use crate::cache::CacheEntry;

/// Transport-level fetch failure. HTTP error statuses are not errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FetchError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// An intercepted request.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchRequest {
    /// Request URL.
    pub url: Url,

    /// Request method.
    pub method: String,

    /// Request headers.
    pub headers: HashMap<String, String>,
}

impl FetchRequest {
    /// Create a GET request.
    pub fn get(url: Url) -> Self {
        Self {
            url,
            method: "GET".to_string(),
            headers: HashMap::new(),
        }
    }

    /// Parse `url` and create a GET request.
    pub fn parse(url: &str) -> Result<Self, FetchError> {
        Url::parse(url)
            .map(Self::get)
            .map_err(|e| FetchError::InvalidUrl(format!("{url}: {e}")))
    }

    /// Set the method.
    pub fn method(mut self, method: &str) -> Self {
        self.method = method.to_ascii_uppercase();
        self
    }

    /// Add a header.
    pub fn header(mut self, name: &str, value: &str) -> Self {
        self.headers
            .insert(name.to_ascii_lowercase(), value.to_string());
        self
    }

    /// Key the request is stored under in a cache bucket. Fragments never take part.
    pub fn cache_key(&self) -> String {
        let mut url = self.url.clone();
        url.set_fragment(None);
        url.into()
    }

    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }
}

/// A response handed back to the requesting page.
#[derive(Debug, Clone, PartialEq)]
pub struct FetchResponse {
    /// Final response URL.
    pub url: String,

    /// Status code.
    pub status: u16,

    /// Status text.
    pub status_text: String,

    /// Response headers.
    pub headers: HashMap<String, String>,

    /// Response body.
    pub body: Vec<u8>,

    /// Whether from cache.
    pub from_cache: bool,
}

impl FetchResponse {
    /// Check if the status is 2xx.
    pub fn ok(&self) -> bool {
        (200..300).contains(&self.status)
    }

    /// Create a response from cache entry.
    pub fn from_cache(entry: &CacheEntry) -> Self {
        Self {
            url: entry.url.clone(),
            status: entry.status,
            status_text: entry.status_text.clone(),
            headers: entry.headers.clone(),
            body: entry.body.clone(),
            from_cache: true,
        }
    }

    /// Turn a network response into a cache entry keyed by `request`.
    pub fn to_cache_entry(&self, request: &FetchRequest) -> CacheEntry {
        CacheEntry {
            url: request.cache_key(),
            method: request.method.clone(),
            status: self.status,
            status_text: self.status_text.clone(),
            headers: self.headers.clone(),
            body: self.body.clone(),
            cached_at: CacheEntry::now_millis(),
        }
    }
}

/// The network, as seen by the worker.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Issue `request` and return whatever response arrives.
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError>;
}
