//! # Divine Delights Server
//!
//! Serves the storefront: the featured products API, the static site from
//! the public directory, and the worker script with the headers a
//! root-scoped worker needs.

use std::net::SocketAddr;
use std::path::Path;

use axum::http::{header, HeaderName, HeaderValue};
use axum::routing::get;
use axum::{Json, Router};
use delights_core::{featured_products, ProductsEnvelope, StorefrontConfig};
use thiserror::Error;
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::services::{ServeDir, ServeFile};
use tower_http::set_header::SetResponseHeaderLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

/// Errors that can occur while running the server.
#[derive(Error, Debug)]
pub enum ServerError {
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("Server error: {0}")]
    Serve(#[from] std::io::Error),
}

/// Build the storefront router over `public_dir`.
///
/// `script_path` is the URL path of the worker script, e.g. `/sw.js`.
pub fn router(public_dir: &Path, script_path: &str) -> Router {
    let script_file = public_dir.join(script_path.trim_start_matches('/'));
    let script = ServiceBuilder::new()
        .layer(SetResponseHeaderLayer::overriding(
            HeaderName::from_static("service-worker-allowed"),
            HeaderValue::from_static("/"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-cache"),
        ))
        .service(ServeFile::new(script_file));

    Router::new()
        .route("/api/products", get(products))
        .route_service(script_path, script)
        .fallback_service(ServeDir::new(public_dir))
        .layer(TraceLayer::new_for_http())
}

async fn products() -> Json<ProductsEnvelope> {
    Json(ProductsEnvelope::success(featured_products()))
}

/// Bind and serve until Ctrl-C.
pub async fn serve(config: &StorefrontConfig) -> Result<(), ServerError> {
    let addr = SocketAddr::new(config.bind_address, config.port);
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|source| ServerError::Bind { addr, source })?;

    if !config.public_dir.is_dir() {
        warn!(dir = %config.public_dir.display(), "Public directory does not exist");
    }
    info!(%addr, dir = %config.public_dir.display(), "Storefront listening");

    let app = router(&config.public_dir, &config.offline.script_url);
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Storefront stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}
