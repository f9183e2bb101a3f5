//! Upload orchestrator
//!
//! Drives one classified request through the pipeline:
//!
//! ```text
//! classify ─► for each file: normalize ─► folder/name ─► resolve ─► put ─► UploadResult
//!                                                                         │
//!                                              aggregate in input order ◄─┘
//! ```
//!
//! Files are stored concurrently (bounded by `upload.concurrency`) through an
//! order-preserving stream, so results always line up with the files as they
//! were sent regardless of which backend call finishes first.

use super::classify::{FIELD_COVER_IMAGE, FIELD_FILE, FIELD_FILES, FIELD_IMAGES};
use super::collision::KeyReservations;
use super::{
    classify, filename, CollisionResolver, IncomingFile, UploadError, UploadOptions,
    UploadRequest, UploadResult, UploadShape,
};
use crate::config::UploadConfig;
use crate::metrics;
use crate::storage::{StorageBackend, StorageKey};
use futures::stream::{self, StreamExt};
use serde::Serialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;

/// One file of a multi-file request that could not be stored
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileFailure {
    /// Canonical field name the file was sent under
    pub field: String,
    /// Position of the file within its field
    pub index: usize,
    /// Filename as sent by the client
    pub filename: String,
    pub status_code: u16,
    pub message: String,
}

/// Result of a handled upload request
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadOutcome {
    Single(UploadResult),
    Homogeneous {
        results: Vec<UploadResult>,
        errors: Vec<FileFailure>,
    },
    Mixed {
        cover_image: Option<UploadResult>,
        images: Vec<UploadResult>,
        errors: Vec<FileFailure>,
    },
}

impl UploadOutcome {
    /// Files that failed (always empty for `Single`)
    pub fn errors(&self) -> &[FileFailure] {
        match self {
            UploadOutcome::Single(_) => &[],
            UploadOutcome::Homogeneous { errors, .. } | UploadOutcome::Mixed { errors, .. } => {
                errors
            }
        }
    }

    /// Whether every file was stored
    pub fn is_complete(&self) -> bool {
        self.errors().is_empty()
    }

    /// `201` when every file was stored, `207` otherwise
    pub fn status_code(&self) -> u16 {
        if self.is_complete() {
            201
        } else {
            207
        }
    }

    pub fn shape_label(&self) -> &'static str {
        match self {
            UploadOutcome::Single(_) => "single",
            UploadOutcome::Homogeneous { .. } => "homogeneous",
            UploadOutcome::Mixed { .. } => "mixed",
        }
    }

    /// JSON response body
    ///
    /// | Shape | Complete | Partial |
    /// |-------|----------|---------|
    /// | Single | result object | n/a |
    /// | Homogeneous | array of results | `{results, errors}` |
    /// | Mixed | `{coverImage?, images?}` | `{coverImage?, images?, errors}` |
    pub fn to_json(&self) -> Value {
        match self {
            UploadOutcome::Single(result) => json!(result),
            UploadOutcome::Homogeneous { results, errors } if errors.is_empty() => json!(results),
            UploadOutcome::Homogeneous { results, errors } => {
                json!({ "results": results, "errors": errors })
            }
            UploadOutcome::Mixed {
                cover_image,
                images,
                errors,
            } => {
                let mut body = Map::new();
                if let Some(cover) = cover_image {
                    body.insert(FIELD_COVER_IMAGE.into(), json!(cover));
                }
                if !images.is_empty() {
                    body.insert(FIELD_IMAGES.into(), json!(images));
                }
                if !errors.is_empty() {
                    body.insert("errors".into(), json!(errors));
                }
                Value::Object(body)
            }
        }
    }
}

/// File scheduled for storage, tagged with where it came from
struct Job<'a> {
    field: &'static str,
    index: usize,
    file: &'a IncomingFile,
}

/// Stores classified uploads on a [`StorageBackend`]
pub struct Uploader {
    backend: Arc<dyn StorageBackend>,
    resolver: CollisionResolver,
    concurrency: usize,
}

impl Uploader {
    pub fn new(backend: Arc<dyn StorageBackend>, config: &UploadConfig) -> Self {
        Self {
            backend,
            resolver: CollisionResolver::new(config.max_collision_attempts),
            concurrency: config.concurrency.max(1),
        }
    }

    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Classify and store every file of `request`.
    ///
    /// A request that cannot be classified, or whose folder cannot fit in a
    /// storage key, fails before the backend is touched. A `Single` upload
    /// fails with the error of its file, tagged with the field and filename;
    /// multi-file uploads report per-file failures inside the outcome.
    #[tracing::instrument(
        name = "upload.handle",
        skip_all,
        fields(
            actor = request.actor.as_deref().unwrap_or("anonymous"),
            folder = %request.options.folder,
            files = request.file_count(),
            shape = tracing::field::Empty
        )
    )]
    pub async fn handle(&self, request: UploadRequest) -> Result<UploadOutcome, UploadError> {
        let UploadRequest {
            fields,
            options,
            actor,
        } = request;

        let shape = options
            .validate()
            .and_then(|()| classify(fields))
            .inspect_err(|e| {
                metrics::record_request_rejected(error_label(e));
            })?;
        tracing::Span::current().record("shape", shape.label());

        let reservations = KeyReservations::default();
        let actor = actor.as_deref();

        match shape {
            UploadShape::Single(file) => {
                let result = self
                    .store_file(&file, &options, &reservations, actor)
                    .await
                    .map_err(|e| UploadError::File {
                        field: FIELD_FILE.to_string(),
                        filename: file.original_filename().to_string(),
                        source: Box::new(e),
                    })?;
                Ok(UploadOutcome::Single(result))
            }
            UploadShape::Homogeneous(files) => {
                let jobs = tag(FIELD_FILES, &files);
                let (results, errors) = self
                    .store_all(jobs, &options, &reservations, actor)
                    .await
                    .into_iter()
                    .fold((Vec::new(), Vec::new()), |(mut ok, mut failed), (_, r)| {
                        match r {
                            Ok(result) => ok.push(result),
                            Err(failure) => failed.push(failure),
                        }
                        (ok, failed)
                    });
                Ok(UploadOutcome::Homogeneous { results, errors })
            }
            UploadShape::Mixed {
                cover_image,
                images,
            } => {
                let mut jobs: Vec<Job<'_>> = cover_image
                    .iter()
                    .map(|file| Job {
                        field: FIELD_COVER_IMAGE,
                        index: 0,
                        file,
                    })
                    .collect();
                jobs.extend(tag(FIELD_IMAGES, &images));

                let mut cover = None;
                let mut stored_images = Vec::new();
                let mut errors = Vec::new();
                for (field, outcome) in self.store_all(jobs, &options, &reservations, actor).await {
                    match (field, outcome) {
                        (_, Err(failure)) => errors.push(failure),
                        (FIELD_COVER_IMAGE, Ok(result)) => cover = Some(result),
                        (_, Ok(result)) => stored_images.push(result),
                    }
                }

                Ok(UploadOutcome::Mixed {
                    cover_image: cover,
                    images: stored_images,
                    errors,
                })
            }
        }
    }

    /// Store `jobs` concurrently; output order matches input order
    async fn store_all(
        &self,
        jobs: Vec<Job<'_>>,
        options: &UploadOptions,
        reservations: &KeyReservations,
        actor: Option<&str>,
    ) -> Vec<(&'static str, Result<UploadResult, FileFailure>)> {
        let futures: Vec<_> = jobs
            .into_iter()
            .map(|job| self.store_job(job, options, reservations, actor))
            .collect();
        stream::iter(futures)
            .buffered(self.concurrency)
            .collect()
            .await
    }

    /// Store one file of a multi-file request, turning its error into a
    /// [`FileFailure`]
    async fn store_job(
        &self,
        job: Job<'_>,
        options: &UploadOptions,
        reservations: &KeyReservations,
        actor: Option<&str>,
    ) -> (&'static str, Result<UploadResult, FileFailure>) {
        let outcome = self
            .store_file(job.file, options, reservations, actor)
            .await
            .map_err(|e| FileFailure {
                field: job.field.to_string(),
                index: job.index,
                filename: job.file.original_filename().to_string(),
                status_code: e.status_code(),
                message: e.client_message(),
            });
        (job.field, outcome)
    }

    #[tracing::instrument(
        name = "upload.store_file",
        skip(self, file, options, reservations),
        fields(
            original = %file.original_filename(),
            backend = self.backend.name(),
            key = tracing::field::Empty
        ),
        err
    )]
    async fn store_file(
        &self,
        file: &IncomingFile,
        options: &UploadOptions,
        reservations: &KeyReservations,
        actor: Option<&str>,
    ) -> Result<UploadResult, UploadError> {
        let start = Instant::now();
        let backend_name = self.backend.name();

        let result = self.resolve_and_put(file, options, reservations).await;
        metrics::record_upload_duration(backend_name, start.elapsed().as_secs_f64());

        match &result {
            Ok(stored) => {
                metrics::record_upload_success(backend_name, stored.size);
                tracing::Span::current().record("key", stored.public_id.as_str());
                tracing::info!(
                    actor = actor.unwrap_or("anonymous"),
                    key = %stored.public_id,
                    size = stored.size,
                    content_type = %stored.content_type,
                    sha256 = file.body().content_hash().unwrap_or("-"),
                    "Stored file"
                );
            }
            Err(e) => {
                metrics::record_upload_failure(backend_name);
                metrics::record_error(error_label(e));
            }
        }

        result
    }

    async fn resolve_and_put(
        &self,
        file: &IncomingFile,
        options: &UploadOptions,
        reservations: &KeyReservations,
    ) -> Result<UploadResult, UploadError> {
        let name = filename::normalize(file.original_filename(), options.preserve_original_name);
        let candidate = StorageKey::new(&options.folder, name);

        let backend = &self.backend;
        let key = self
            .resolver
            .resolve(candidate, options.prevent_overwrite, |key| {
                let claimed_here = !reservations.try_claim(key);
                let key = key.clone();
                async move {
                    if claimed_here {
                        return Ok(true);
                    }
                    backend.exists(&key).await
                }
            })
            .await?;

        let outcome = self
            .backend
            .put(&key, file.body(), file.content_type())
            .await?;

        Ok(UploadResult {
            url: outcome.url,
            filename: key.name().to_string(),
            public_id: key.as_str().to_string(),
            content_type: file.content_type().to_string(),
            size: file.size(),
        })
    }
}

fn tag<'a>(field: &'static str, files: &'a [IncomingFile]) -> Vec<Job<'a>> {
    files
        .iter()
        .enumerate()
        .map(|(index, file)| Job { field, index, file })
        .collect()
}

/// Metric label for an error
pub(crate) fn error_label(err: &UploadError) -> &'static str {
    use crate::storage::StorageError;

    match err {
        UploadError::UnsupportedShape(_) => "unsupported_shape",
        UploadError::EmptyUpload => "empty_upload",
        UploadError::InvalidMultipart(_) => "invalid_multipart",
        UploadError::PayloadTooLarge(_) => "payload_too_large",
        UploadError::CollisionBoundExceeded { .. } => "collision_bound_exceeded",
        UploadError::Storage(StorageError::Unavailable(_)) => "storage_unavailable",
        UploadError::Storage(StorageError::QuotaExceeded(_)) => "storage_quota_exceeded",
        UploadError::Storage(_) => "storage",
        UploadError::IoError(_) => "io",
        UploadError::File { source, .. } => error_label(source),
    }
}
