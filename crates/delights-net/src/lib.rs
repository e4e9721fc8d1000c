//! # Divine Delights Net
//!
//! The real network behind the offline worker.
//!
//! ## Design Goals
//!
//! 1. **Default request semantics**: manifest entries are fetched as-is, no cache busting
//! 2. **Transparent responses**: every HTTP status comes back as a response, never an error
//! 3. **Transport failures surface unmodified** to the worker and on to the page

use std::time::Duration;

use async_trait::async_trait;
use delights_sw::{FetchError, FetchRequest, FetchResponse, Fetcher};
use hashbrown::HashMap;
use http::{HeaderName, HeaderValue, Method};
use reqwest::Client;
use thiserror::Error;
use tracing::{debug, info, trace};
use url::Url;

/// Errors that can occur while setting up networking.
#[derive(Error, Debug)]
pub enum NetError {
    #[error("Client setup failed: {0}")]
    ClientSetup(String),

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

/// Resource loader configuration.
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    /// User agent string.
    pub user_agent: String,
    /// Accept-Language header.
    pub accept_language: String,
    /// Default timeout.
    pub default_timeout: Duration,
    /// Maximum redirects.
    pub max_redirects: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            user_agent: format!("DivineDelights/{}", env!("CARGO_PKG_VERSION")),
            accept_language: "en-US,en;q=0.9".to_string(),
            default_timeout: Duration::from_secs(30),
            max_redirects: 10,
        }
    }
}

/// Fetches resources over HTTP for the worker.
pub struct ResourceLoader {
    client: Client,
    config: LoaderConfig,
}

impl ResourceLoader {
    /// Create a new resource loader.
    pub fn new(config: LoaderConfig) -> Result<Self, NetError> {
        let client = Client::builder()
            .user_agent(&config.user_agent)
            .timeout(config.default_timeout)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .build()
            .map_err(|e| NetError::ClientSetup(e.to_string()))?;

        info!(user_agent = %config.user_agent, "ResourceLoader initialized");

        Ok(Self { client, config })
    }

    pub fn config(&self) -> &LoaderConfig {
        &self.config
    }

    fn map_error(&self, url: &Url, error: reqwest::Error) -> FetchError {
        if error.is_timeout() {
            FetchError::Timeout(self.config.default_timeout)
        } else if error.is_builder() {
            FetchError::InvalidUrl(format!("{url}: {error}"))
        } else {
            FetchError::Network(format!("{url}: {error}"))
        }
    }
}

#[async_trait]
impl Fetcher for ResourceLoader {
    async fn fetch(&self, request: &FetchRequest) -> Result<FetchResponse, FetchError> {
        debug!(url = %request.url, method = %request.method, "Fetching resource");

        let method = Method::from_bytes(request.method.as_bytes())
            .map_err(|e| FetchError::Network(format!("invalid method {}: {e}", request.method)))?;

        let mut req_builder = self.client.request(method, request.url.clone());

        for (name, value) in &request.headers {
            if let (Ok(n), Ok(v)) = (
                HeaderName::try_from(name.as_str()),
                HeaderValue::try_from(value.as_str()),
            ) {
                req_builder = req_builder.header(n, v);
            }
        }
        if !request.headers.contains_key("accept-language") {
            req_builder = req_builder.header("Accept-Language", &self.config.accept_language);
        }

        let response = req_builder
            .send()
            .await
            .map_err(|e| self.map_error(&request.url, e))?;

        let status = response.status();
        let url = response.url().to_string();
        let headers: HashMap<String, String> = response
            .headers()
            .iter()
            .filter_map(|(name, value)| {
                value
                    .to_str()
                    .ok()
                    .map(|v| (name.as_str().to_string(), v.to_string()))
            })
            .collect();

        let body = response
            .bytes()
            .await
            .map_err(|e| self.map_error(&request.url, e))?;

        trace!(
            url = %url,
            status = %status,
            body_len = body.len(),
            "Response received"
        );

        Ok(FetchResponse {
            url,
            status: status.as_u16(),
            status_text: status.canonical_reason().unwrap_or("").to_string(),
            headers,
            body: body.to_vec(),
            from_cache: false,
        })
    }
}

/// Parse an origin such as `http://localhost:5000`.
pub fn parse_origin(origin: &str) -> Result<Url, NetError> {
    let url = Url::parse(origin).map_err(|e| NetError::InvalidUrl(format!("{origin}: {e}")))?;
    if !matches!(url.scheme(), "http" | "https") || url.host().is_none() {
        return Err(NetError::InvalidUrl(format!(
            "{origin}: expected an http(s) origin"
        )));
    }
    Ok(url)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn loader() -> ResourceLoader {
        ResourceLoader::new(LoaderConfig::default()).unwrap()
    }

    fn request(server: &MockServer, p: &str) -> FetchRequest {
        FetchRequest::parse(&format!("{}{}", server.uri(), p)).unwrap()
    }

    #[test]
    fn test_loader_config_default() {
        let config = LoaderConfig::default();
        assert!(config.user_agent.starts_with("DivineDelights/"));
        assert_eq!(config.max_redirects, 10);
    }

    #[test]
    fn test_parse_origin() {
        assert!(parse_origin("http://localhost:5000").is_ok());
        assert!(parse_origin("file:///tmp").is_err());
        assert!(parse_origin("localhost").is_err());
    }

    #[tokio::test]
    async fn test_fetch_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/styles.css"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("body{}")
                    .insert_header("Content-Type", "text/css"),
            )
            .expect(1)
            .mount(&server)
            .await;

        let response = loader()
            .fetch(&request(&server, "/styles.css"))
            .await
            .unwrap();

        assert_eq!(response.status, 200);
        assert_eq!(response.status_text, "OK");
        assert_eq!(response.body, b"body{}");
        assert_eq!(
            response.headers.get("content-type").map(String::as_str),
            Some("text/css")
        );
        assert!(!response.from_cache);
    }

    #[tokio::test]
    async fn test_fetch_error_status_is_a_response() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/missing.png"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let response = loader()
            .fetch(&request(&server, "/missing.png"))
            .await
            .unwrap();

        assert_eq!(response.status, 404);
        assert!(!response.ok());
    }

    #[tokio::test]
    async fn test_fetch_forwards_method_and_headers() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/api/products"))
            .and(header("x-requested-with", "delights"))
            .respond_with(ResponseTemplate::new(201))
            .expect(1)
            .mount(&server)
            .await;

        let req = request(&server, "/api/products")
            .method("POST")
            .header("X-Requested-With", "delights");
        let response = loader().fetch(&req).await.unwrap();

        assert_eq!(response.status, 201);
    }

    #[tokio::test]
    async fn test_fetch_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
            .mount(&server)
            .await;

        let loader = ResourceLoader::new(LoaderConfig {
            default_timeout: Duration::from_millis(100),
            ..Default::default()
        })
        .unwrap();

        let err = loader.fetch(&request(&server, "/slow")).await.unwrap_err();
        assert_eq!(err, FetchError::Timeout(Duration::from_millis(100)));
    }

    #[tokio::test]
    async fn test_fetch_connection_refused() {
        let port = std::net::TcpListener::bind("127.0.0.1:0")
            .unwrap()
            .local_addr()
            .unwrap()
            .port();
        let url = FetchRequest::parse(&format!("http://127.0.0.1:{port}/index.html")).unwrap();

        let err = loader().fetch(&url).await.unwrap_err();
        assert!(matches!(err, FetchError::Network(_)));
    }
}
