//! Media Uploadr Library
//!
//! Media upload pipeline for a portfolio CMS backend: accepts multipart
//! uploads, names files safely (Unicode names included), avoids silent
//! overwrites and stores the bytes on a pluggable object-storage backend.
//!
//! # Features
//!
//! - **Upload shapes**: single `file`, `files[]`, or `coverImage` + `images[]`
//! - **Unicode names**: original names kept as sent, minus reserved characters
//! - **No silent overwrites**: `name-1.ext`, `name-2.ext`, ... on collision
//! - **Pluggable storage**: S3-compatible buckets, CDN storage zones, memory
//!
//! # Example
//!
//! ```no_run
//! use media_uploadr::{config::Config, server::UploadServer, storage::build_backend};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = Config::load("config.yaml")?;
//!     let backend = build_backend(&config.storage)?;
//!     let server = UploadServer::bind(&config, backend).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

pub mod auth;
pub mod config;
pub mod metrics;
pub mod server;
pub mod storage;
pub mod upload;

// Re-export commonly used types
pub use config::Config;
pub use server::UploadServer;
pub use storage::{StorageBackend, StorageKey};
pub use upload::{UploadOutcome, UploadRequest, UploadResult, Uploader};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
