//! CDN storage-zone backend
//!
//! Talks to an edge-storage HTTP API where objects live at
//! `{endpoint}/{zone}/{key}` and requests authenticate with an `AccessKey`
//! header. Files are served from the zone's pull hostname (`public_url`).

use super::key::join_url;
use super::{resolve_credentials, PutOutcome, StorageBackend, StorageError, StorageKey};
use crate::config::StorageConfig;
use crate::upload::FileBody;
use async_trait::async_trait;
use reqwest::{header, StatusCode};
use std::time::Duration;

const ACCESS_KEY_HEADER: &str = "AccessKey";

/// Storage zone behind a CDN
pub struct CdnBackend {
    client: reqwest::Client,
    endpoint: String,
    zone: String,
    access_key: String,
    public_url: String,
}

impl CdnBackend {
    /// Create a backend from storage configuration
    ///
    /// The zone password goes in `credentials.secret_key`; when only
    /// `access_key` is configured that value is sent instead.
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let endpoint = config.endpoint.clone().ok_or_else(|| {
            StorageError::Config("the cdn provider needs an endpoint".into())
        })?;
        let (access_key, secret_key) = resolve_credentials(config)?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| StorageError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            zone: config.bucket.clone(),
            access_key: secret_key.unwrap_or(access_key),
            public_url: config
                .public_url
                .clone()
                .unwrap_or_else(|| format!("https://{}.b-cdn.net", config.bucket)),
        })
    }

    /// Storage API address of `key`
    fn object_url(&self, key: &StorageKey) -> String {
        join_url(&format!("{}/{}", self.endpoint, self.zone), key)
    }

    pub fn zone(&self) -> &str {
        &self.zone
    }
}

#[async_trait]
impl StorageBackend for CdnBackend {
    fn name(&self) -> &'static str {
        "cdn"
    }

    #[tracing::instrument(
        name = "cdn.put_object",
        skip(self, body),
        fields(
            cdn.zone = %self.zone,
            cdn.key = %key,
            upload.bytes = body.len(),
            http.status_code = tracing::field::Empty
        ),
        err
    )]
    async fn put(
        &self,
        key: &StorageKey,
        body: &FileBody,
        content_type: &str,
    ) -> Result<PutOutcome, StorageError> {
        let payload = match body {
            FileBody::Memory(bytes) => reqwest::Body::from(bytes.clone()),
            FileBody::Spooled(_) => reqwest::Body::wrap_stream(body.open_stream().await?),
        };

        let response = self
            .client
            .put(self.object_url(key))
            .header(ACCESS_KEY_HEADER, &self.access_key)
            .header(header::CONTENT_TYPE, content_type)
            .header(header::CONTENT_LENGTH, body.len())
            .body(payload)
            .send()
            .await
            .map_err(|e| map_transport_error("PUT", e))?;

        let status = response.status();
        tracing::Span::current().record("http.status_code", status.as_u16());
        if !status.is_success() {
            return Err(map_status("PUT", status));
        }

        Ok(PutOutcome {
            url: self.public_url(key),
            etag: response
                .headers()
                .get(header::ETAG)
                .and_then(|v| v.to_str().ok())
                .map(str::to_string),
        })
    }

    #[tracing::instrument(
        name = "cdn.head_object",
        skip(self),
        fields(cdn.zone = %self.zone, cdn.key = %key, cdn.found = tracing::field::Empty),
        err
    )]
    async fn exists(&self, key: &StorageKey) -> Result<bool, StorageError> {
        let response = self
            .client
            .head(self.object_url(key))
            .header(ACCESS_KEY_HEADER, &self.access_key)
            .send()
            .await
            .map_err(|e| map_transport_error("HEAD", e))?;

        let status = response.status();
        let found = match status {
            StatusCode::NOT_FOUND => false,
            s if s.is_success() => true,
            s => return Err(map_status("HEAD", s)),
        };

        tracing::Span::current().record("cdn.found", found);
        Ok(found)
    }

    fn public_url(&self, key: &StorageKey) -> String {
        join_url(&self.public_url, key)
    }
}

fn map_transport_error(method: &str, err: reqwest::Error) -> StorageError {
    tracing::warn!(method = method, error = %err, "CDN request failed");
    if err.is_timeout() {
        StorageError::Unavailable(format!("{} timed out", method))
    } else {
        StorageError::Unavailable(format!("{} could not reach provider", method))
    }
}

fn map_status(method: &str, status: StatusCode) -> StorageError {
    tracing::warn!(method = method, status = status.as_u16(), "CDN rejected request");
    match status {
        StatusCode::INSUFFICIENT_STORAGE | StatusCode::PAYLOAD_TOO_LARGE => {
            StorageError::QuotaExceeded(format!("{} rejected with HTTP {}", method, status.as_u16()))
        }
        _ => StorageError::Unavailable(format!(
            "{} rejected with HTTP {}",
            method,
            status.as_u16()
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{CredentialsConfig, StorageProvider};

    fn config() -> StorageConfig {
        StorageConfig {
            provider: StorageProvider::Cdn,
            endpoint: Some("https://storage.bunnycdn.com/".into()),
            region: "de".into(),
            bucket: "portfolio".into(),
            force_path_style: false,
            credentials: Some(CredentialsConfig {
                access_key: "zone-password".into(),
                secret_key: None,
            }),
            public_url: Some("https://portfolio.b-cdn.net".into()),
            acl: None,
            timeout_seconds: 5,
        }
    }

    #[test]
    fn test_object_url() {
        let backend = CdnBackend::new(&config()).unwrap();
        let key = StorageKey::new("albums", "cover.jpg");
        assert_eq!(
            backend.object_url(&key),
            "https://storage.bunnycdn.com/portfolio/albums/cover.jpg"
        );
        assert_eq!(
            backend.public_url(&key),
            "https://portfolio.b-cdn.net/albums/cover.jpg"
        );
    }

    #[test]
    fn test_status_mapping() {
        assert!(matches!(
            map_status("PUT", StatusCode::INSUFFICIENT_STORAGE),
            StorageError::QuotaExceeded(_)
        ));
        assert!(matches!(
            map_status("PUT", StatusCode::UNAUTHORIZED),
            StorageError::Unavailable(_)
        ));
    }

    #[test]
    fn test_endpoint_required() {
        let mut config = config();
        config.endpoint = None;
        assert!(matches!(
            CdnBackend::new(&config),
            Err(StorageError::Config(_))
        ));
    }
}
