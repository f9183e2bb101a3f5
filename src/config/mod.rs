//! Configuration module for Media Uploadr
//!
//! Handles loading and parsing of YAML configuration files with support for
//! environment variable expansion and validation. The resulting [`Config`] is
//! built once at startup and passed explicitly to the components that need it.

use crate::storage::key::{normalize_folder, MAX_FOLDER_BYTES};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

mod loader;

pub use loader::ConfigLoader;

// ============================================================================
// Environment Variable Expansion
// ============================================================================

/// Expand environment variables in a string.
///
/// Supports two syntaxes:
/// - `${VAR_NAME}` - Simple expansion, keeps placeholder if var not found
/// - `${VAR_NAME:-default}` - Expansion with default value
///
/// Variable names must start with a letter or underscore and contain only
/// uppercase letters, digits, and underscores.
///
/// # Examples
///
/// ```ignore
/// std::env::set_var("MY_VAR", "value");
/// let result = expand_env_vars("prefix-${MY_VAR}-suffix");
/// assert_eq!(result, "prefix-value-suffix");
///
/// let result = expand_env_vars("${MISSING:-default}");
/// assert_eq!(result, "default");
/// ```
pub(crate) fn expand_env_vars(s: &str) -> String {
    let re = match regex_lite::Regex::new(r"\$\{([A-Z_][A-Z0-9_]*)(?::-([^}]+))?\}") {
        Ok(re) => re,
        Err(_) => return s.to_string(),
    };
    let mut last_match = 0;
    let mut result = String::with_capacity(s.len());

    for cap in re.captures_iter(s) {
        let (Some(full_match), Some(var_name)) = (cap.get(0), cap.get(1)) else {
            continue;
        };

        result.push_str(&s[last_match..full_match.start()]);

        let value = match std::env::var(var_name.as_str()) {
            Ok(val) => val,
            Err(_) => match cap.get(2) {
                Some(default) => default.as_str().to_string(),
                // No env var and no default. Keep the original placeholder.
                None => full_match.as_str().to_string(),
            },
        };
        result.push_str(&value);

        last_match = full_match.end();
    }

    result.push_str(&s[last_match..]);

    result
}

/// Validate that a URL starts with http:// or https://
fn is_valid_http_url(url: &str) -> bool {
    url.starts_with("http://") || url.starts_with("https://")
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    #[error("Invalid configuration: {0}")]
    ValidationError(String),
}

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub storage: StorageConfig,
    #[serde(default)]
    pub upload: UploadConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl Config {
    /// Load configuration from a file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        ConfigLoader::load(path)
    }

    /// Parse configuration from a YAML string (after env expansion)
    pub fn from_yaml_str(content: &str) -> Result<Self, ConfigError> {
        ConfigLoader::parse(content)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !self.server.upload_path.starts_with('/') {
            return Err(ConfigError::ValidationError(format!(
                "server.upload_path '{}' must start with '/'",
                self.server.upload_path
            )));
        }

        self.storage.validate()?;

        if self.upload.concurrency == 0 {
            return Err(ConfigError::ValidationError(
                "upload.concurrency must be at least 1".into(),
            ));
        }
        if self.upload.max_collision_attempts == 0 {
            return Err(ConfigError::ValidationError(
                "upload.max_collision_attempts must be at least 1".into(),
            ));
        }
        if self.upload.max_files == 0 {
            return Err(ConfigError::ValidationError(
                "upload.max_files must be at least 1".into(),
            ));
        }
        if normalize_folder(&self.upload.default_folder).len() > MAX_FOLDER_BYTES {
            return Err(ConfigError::ValidationError(format!(
                "upload.default_folder exceeds {} bytes",
                MAX_FOLDER_BYTES
            )));
        }

        if self.auth.enabled {
            let jwt = self.auth.jwt.as_ref().ok_or_else(|| {
                ConfigError::ValidationError("auth.enabled requires auth.jwt".into())
            })?;
            if jwt.secret.as_deref().map_or(true, str::is_empty) {
                return Err(ConfigError::ValidationError(
                    "auth.jwt.secret must be set when auth is enabled".into(),
                ));
            }
            match jwt.algorithm.to_uppercase().as_str() {
                "HS256" | "RS256" | "ES256" => {}
                other => {
                    return Err(ConfigError::ValidationError(format!(
                        "Unsupported JWT algorithm '{}': must be HS256, RS256 or ES256",
                        other
                    )))
                }
            }
        }

        Ok(())
    }
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub address: String,
    /// Path of the multipart upload endpoint
    #[serde(default = "default_upload_path")]
    pub upload_path: String,
}

fn default_upload_path() -> String {
    "/upload".to_string()
}

/// Object storage provider selection
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StorageProvider {
    /// S3-compatible bucket (AWS S3, Digital Ocean Spaces, MinIO, R2)
    #[default]
    S3,
    /// CDN storage-zone HTTP API
    Cdn,
    /// In-process map, for tests and local development
    Memory,
}

impl std::fmt::Display for StorageProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            StorageProvider::S3 => "s3",
            StorageProvider::Cdn => "cdn",
            StorageProvider::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// Storage backend configuration
///
/// # Example
///
/// ```yaml
/// storage:
///   provider: s3
///   endpoint: "https://sgp1.digitaloceanspaces.com"
///   region: "sgp1"
///   bucket: "portfolio-media"
///   force_path_style: false
///   credentials:
///     access_key: "${SPACES_KEY}"
///     secret_key: "${SPACES_SECRET}"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    #[serde(default)]
    pub provider: StorageProvider,
    /// Provider endpoint. Defaults to AWS for S3; required for CDN.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_region")]
    pub region: String,
    /// Bucket (S3) or storage zone (CDN) name
    pub bucket: String,
    #[serde(default)]
    pub force_path_style: bool,
    #[serde(default)]
    pub credentials: Option<CredentialsConfig>,
    /// Public base URL used when building object URLs (e.g. a CDN hostname)
    #[serde(default)]
    pub public_url: Option<String>,
    /// Canned ACL applied to stored objects by the s3 provider (e.g. `public-read`)
    #[serde(default)]
    pub acl: Option<String>,
    /// Per-operation timeout for put/exists calls
    #[serde(default = "default_storage_timeout")]
    pub timeout_seconds: u64,
}

impl StorageConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.trim().is_empty() {
            return Err(ConfigError::ValidationError(
                "storage.bucket cannot be empty".into(),
            ));
        }

        if let Some(endpoint) = &self.endpoint {
            if !is_valid_http_url(endpoint) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid storage endpoint '{}': must start with http:// or https://",
                    endpoint
                )));
            }
        }

        if let Some(public_url) = &self.public_url {
            if !is_valid_http_url(public_url) {
                return Err(ConfigError::ValidationError(format!(
                    "Invalid storage public_url '{}': must start with http:// or https://",
                    public_url
                )));
            }
        }

        if self.provider == StorageProvider::Cdn {
            if self.endpoint.is_none() {
                return Err(ConfigError::ValidationError(
                    "storage.endpoint is required for the cdn provider".into(),
                ));
            }
            if self.public_url.is_none() {
                return Err(ConfigError::ValidationError(
                    "storage.public_url is required for the cdn provider".into(),
                ));
            }
        }

        if self.timeout_seconds == 0 {
            return Err(ConfigError::ValidationError(
                "storage.timeout_seconds must be at least 1".into(),
            ));
        }

        Ok(())
    }
}

fn default_region() -> String {
    "us-east-1".to_string()
}

fn default_storage_timeout() -> u64 {
    30
}

/// Static storage credentials
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    pub access_key: String,
    #[serde(default)]
    pub secret_key: Option<String>,
}

/// Upload pipeline configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UploadConfig {
    /// Folder used when the request does not send one
    #[serde(default = "default_folder")]
    pub default_folder: String,
    /// Default for the `preserveOriginalName` form field
    #[serde(default)]
    pub preserve_original_name: bool,
    /// Default for the `preventOverwrite` form field
    #[serde(default = "default_prevent_overwrite")]
    pub prevent_overwrite: bool,
    /// Existence checks per file before giving up on a free key
    #[serde(default = "default_max_collision_attempts")]
    pub max_collision_attempts: usize,
    /// Files stored in parallel within one request
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_file_size")]
    pub max_file_size: u64,
    #[serde(default = "default_max_files")]
    pub max_files: usize,
    /// Directory for spooled parts. Defaults to the system temp dir.
    #[serde(default)]
    pub spool_dir: Option<PathBuf>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            default_folder: default_folder(),
            preserve_original_name: false,
            prevent_overwrite: default_prevent_overwrite(),
            max_collision_attempts: default_max_collision_attempts(),
            concurrency: default_concurrency(),
            max_file_size: default_max_file_size(),
            max_files: default_max_files(),
            spool_dir: None,
        }
    }
}

fn default_folder() -> String {
    "uploads".to_string()
}

fn default_prevent_overwrite() -> bool {
    true
}

fn default_max_collision_attempts() -> usize {
    16
}

fn default_concurrency() -> usize {
    4
}

fn default_max_file_size() -> u64 {
    52428800 // 50MB
}

fn default_max_files() -> usize {
    20
}

/// Authentication configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub jwt: Option<JwtConfig>,
}

/// JWT configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JwtConfig {
    /// HMAC secret (HS256) or PEM public key (RS256/ES256)
    pub secret: Option<String>,
    #[serde(default = "default_jwt_algorithm")]
    pub algorithm: String,
    #[serde(default)]
    pub issuer: Option<String>,
    #[serde(default)]
    pub audience: Option<String>,
}

fn default_jwt_algorithm() -> String {
    "HS256".to_string()
}

/// Metrics configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    #[serde(default = "default_metrics_enabled")]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: default_metrics_enabled(),
            port: default_metrics_port(),
        }
    }
}

fn default_metrics_enabled() -> bool {
    true
}

fn default_metrics_port() -> u16 {
    9090
}
