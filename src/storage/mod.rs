//! Object storage backends
//!
//! Every provider is reached through the [`StorageBackend`] trait so that the
//! upload pipeline never touches a provider SDK directly. Swapping providers is
//! a configuration change; callers only see a different URL authority.
//!
//! # Providers
//!
//! | Provider | Adapter | Notes |
//! |----------|---------|-------|
//! | `s3` | [`S3Backend`] | AWS S3, Digital Ocean Spaces, MinIO, R2 |
//! | `cdn` | [`CdnBackend`] | Storage-zone HTTP API (`PUT /{zone}/{key}`) |
//! | `memory` | [`MemoryBackend`] | In-process, for tests and local runs |
//!
//! # Example
//!
//! ```no_run
//! use media_uploadr::config::Config;
//! use media_uploadr::storage::build_backend;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load("config.yaml")?;
//! let backend = build_backend(&config.storage)?;
//! println!("Using {} backend", backend.name());
//! # Ok(())
//! # }
//! ```

use crate::config::{StorageConfig, StorageProvider};
use crate::upload::FileBody;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;

pub mod cdn;
pub mod key;
pub mod memory;
pub mod s3;

pub use cdn::CdnBackend;
pub use key::StorageKey;
pub use memory::MemoryBackend;
pub use s3::S3Backend;

/// Storage backend errors
#[derive(Error, Debug)]
pub enum StorageError {
    /// Network, auth or timeout failure talking to the provider
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// The provider reported that the quota is used up
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    #[error("Storage configuration error: {0}")]
    Config(String),

    /// The local upload body could not be read
    #[error("Failed to read upload body: {0}")]
    Body(#[from] std::io::Error),
}

/// Result of a successful put
#[derive(Debug, Clone)]
pub struct PutOutcome {
    /// Public address of the object
    pub url: String,
    pub etag: Option<String>,
}

/// Uniform capability set over object-storage providers
#[async_trait]
pub trait StorageBackend: Send + Sync {
    /// Provider label for logs and metrics
    fn name(&self) -> &'static str;

    /// Store `body` under `key`, replacing any existing object
    async fn put(
        &self,
        key: &StorageKey,
        body: &FileBody,
        content_type: &str,
    ) -> Result<PutOutcome, StorageError>;

    /// Whether an object exists under `key`. Not-found is `Ok(false)`.
    async fn exists(&self, key: &StorageKey) -> Result<bool, StorageError>;

    /// Public URL of `key`, built from configuration only
    fn public_url(&self, key: &StorageKey) -> String;
}

/// Build the backend selected by `config.provider`
pub fn build_backend(config: &StorageConfig) -> Result<Arc<dyn StorageBackend>, StorageError> {
    let backend: Arc<dyn StorageBackend> = match config.provider {
        StorageProvider::S3 => Arc::new(S3Backend::new(config)?),
        StorageProvider::Cdn => Arc::new(CdnBackend::new(config)?),
        StorageProvider::Memory => Arc::new(MemoryBackend::from_config(config)),
    };

    tracing::info!(
        provider = %config.provider,
        bucket = %config.bucket,
        endpoint = ?config.endpoint,
        "Storage backend ready"
    );

    Ok(backend)
}

/// Access/secret key pair, from configuration or the standard AWS variables
pub(crate) fn resolve_credentials(
    config: &StorageConfig,
) -> Result<(String, Option<String>), StorageError> {
    if let Some(credentials) = &config.credentials {
        return Ok((credentials.access_key.clone(), credentials.secret_key.clone()));
    }

    let access_key = std::env::var("AWS_ACCESS_KEY_ID").map_err(|_| {
        StorageError::Config(
            "no storage.credentials configured and AWS_ACCESS_KEY_ID not set".into(),
        )
    })?;
    let secret_key = std::env::var("AWS_SECRET_ACCESS_KEY").ok();

    Ok((access_key, secret_key))
}
