//! Divine Delights Core Library
//!
//! This crate provides shared types, errors, and configuration for the storefront.

pub mod config;
pub mod error;
pub mod types;

pub use config::{MissPolicySetting, OfflineSettings, StorefrontConfig, CACHE_NAME, DEFAULT_MANIFEST};
pub use error::{CoreError, CoreResult};
pub use types::{catalog, featured_products, Product, ProductsEnvelope};
