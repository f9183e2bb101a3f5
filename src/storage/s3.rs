//! S3-compatible storage backend
//!
//! Works against AWS S3 and S3-compatible providers such as Digital Ocean
//! Spaces, MinIO and Cloudflare R2.
//!
//! # Tracing
//!
//! | Operation | Span Name | Attributes |
//! |-----------|-----------|------------|
//! | PutObject | `s3.put_object` | bucket, key, bytes, etag |
//! | HeadObject | `s3.head_object` | bucket, key, found |

use super::key::join_url;
use super::{resolve_credentials, PutOutcome, StorageBackend, StorageError, StorageKey};
use crate::config::StorageConfig;
use crate::upload::FileBody;
use async_trait::async_trait;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::timeout::TimeoutConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_s3::operation::head_object::HeadObjectError;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ObjectCannedAcl;
use std::time::Duration;

/// Provider error codes that mean the account is out of space
const QUOTA_ERROR_CODES: &[&str] = &[
    "QuotaExceeded",
    "StorageQuotaExceeded",
    "ServiceQuotaExceeded",
    "InsufficientStorage",
];

/// S3-compatible bucket
pub struct S3Backend {
    client: aws_sdk_s3::Client,
    bucket: String,
    endpoint: String,
    force_path_style: bool,
    public_url: Option<String>,
    acl: Option<ObjectCannedAcl>,
}

impl S3Backend {
    /// Create a backend from storage configuration
    pub fn new(config: &StorageConfig) -> Result<Self, StorageError> {
        let (access_key, secret_key) = resolve_credentials(config)?;
        let secret_key = secret_key.ok_or_else(|| {
            StorageError::Config("the s3 provider needs a secret_key".into())
        })?;

        let endpoint = config
            .endpoint
            .clone()
            .unwrap_or_else(|| format!("https://s3.{}.amazonaws.com", config.region));

        let timeout = Duration::from_secs(config.timeout_seconds);
        let sdk_config = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .endpoint_url(&endpoint)
            .force_path_style(config.force_path_style)
            .credentials_provider(Credentials::new(
                access_key,
                secret_key,
                None,
                None,
                "media-uploadr-config",
            ))
            .timeout_config(
                TimeoutConfig::builder()
                    .connect_timeout(timeout)
                    .operation_timeout(timeout)
                    .build(),
            )
            .build();

        Ok(Self {
            client: aws_sdk_s3::Client::from_conf(sdk_config),
            bucket: config.bucket.clone(),
            endpoint,
            force_path_style: config.force_path_style,
            public_url: config.public_url.clone(),
            acl: config.acl.as_deref().map(ObjectCannedAcl::from),
        })
    }

    /// Get the bucket name
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Get the endpoint URL
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

#[async_trait]
impl StorageBackend for S3Backend {
    fn name(&self) -> &'static str {
        "s3"
    }

    #[tracing::instrument(
        name = "s3.put_object",
        skip(self, body),
        fields(
            s3.bucket = %self.bucket,
            s3.key = %key,
            upload.bytes = body.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    async fn put(
        &self,
        key: &StorageKey,
        body: &FileBody,
        content_type: &str,
    ) -> Result<PutOutcome, StorageError> {
        let stream = match body {
            FileBody::Memory(bytes) => ByteStream::from(bytes.clone()),
            FileBody::Spooled(spool) => ByteStream::from_path(spool.path())
                .await
                .map_err(|e| StorageError::Body(std::io::Error::other(e)))?,
        };

        let mut request = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .content_type(content_type)
            .content_length(body.len() as i64)
            .body(stream);
        if let Some(acl) = &self.acl {
            request = request.acl(acl.clone());
        }

        let output = request.send().await.map_err(|e| map_sdk_error("PutObject", e))?;

        let etag = output.e_tag().map(str::to_string);
        if let Some(etag) = &etag {
            tracing::Span::current().record("s3.etag", etag.as_str());
        }

        Ok(PutOutcome {
            url: self.public_url(key),
            etag,
        })
    }

    #[tracing::instrument(
        name = "s3.head_object",
        skip(self),
        fields(s3.bucket = %self.bucket, s3.key = %key, s3.found = tracing::field::Empty),
        err
    )]
    async fn exists(&self, key: &StorageKey) -> Result<bool, StorageError> {
        let result = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key.as_str())
            .send()
            .await;

        let found = match result {
            Ok(_) => true,
            Err(err) => {
                let not_found = err.as_service_error().is_some_and(HeadObjectError::is_not_found)
                    || err
                        .raw_response()
                        .is_some_and(|response| response.status().as_u16() == 404);
                if !not_found {
                    return Err(map_sdk_error("HeadObject", err));
                }
                false
            }
        };

        tracing::Span::current().record("s3.found", found);
        Ok(found)
    }

    fn public_url(&self, key: &StorageKey) -> String {
        if let Some(base) = &self.public_url {
            return join_url(base, key);
        }

        if self.force_path_style {
            return join_url(&format!("{}/{}", self.endpoint.trim_end_matches('/'), self.bucket), key);
        }

        // Virtual-hosted style: scheme://bucket.host/key
        match self.endpoint.split_once("://") {
            Some((scheme, host)) => join_url(
                &format!("{}://{}.{}", scheme, self.bucket, host.trim_end_matches('/')),
                key,
            ),
            None => join_url(&format!("https://{}.{}", self.bucket, self.endpoint), key),
        }
    }
}

/// Translate an SDK failure into the storage error taxonomy. The full SDK
/// error goes to the log; the returned message stays short.
fn map_sdk_error<E>(operation: &str, err: SdkError<E, HttpResponse>) -> StorageError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    let status = err.raw_response().map(|response| response.status().as_u16());
    let code = err.code().map(str::to_string);

    tracing::warn!(
        operation = operation,
        status = ?status,
        code = ?code,
        error = %DisplayErrorContext(&err),
        "S3 request failed"
    );

    let quota = status == Some(507)
        || code
            .as_deref()
            .is_some_and(|code| QUOTA_ERROR_CODES.contains(&code));
    if quota {
        return StorageError::QuotaExceeded(format!("{} rejected by provider", operation));
    }

    let reason = match (&err, status, code) {
        (SdkError::TimeoutError(_), _, _) => "timed out".to_string(),
        (SdkError::DispatchFailure(_), _, _) => "could not reach provider".to_string(),
        (_, _, Some(code)) => format!("provider returned {}", code),
        (_, Some(status), None) => format!("provider returned HTTP {}", status),
        _ => "request failed".to_string(),
    };
    StorageError::Unavailable(format!("{} {}", operation, reason))
}
