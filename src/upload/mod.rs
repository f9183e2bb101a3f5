//! Upload module
//!
//! The media upload pipeline: multipart intake, request classification,
//! filename policy, collision avoidance and the orchestrator that hands
//! files to a [`StorageBackend`](crate::storage::StorageBackend).

use crate::config::UploadConfig;
use crate::storage::key::{normalize_folder, MAX_FOLDER_BYTES};
use crate::storage::StorageError;
use bytes::Bytes;
use futures::stream::{self, BoxStream, StreamExt};
use serde::Serialize;
use std::io;
use thiserror::Error;

pub mod classify;
pub mod collision;
pub mod filename;
pub mod intake;
pub mod orchestrator;
pub mod spool;

pub use classify::{classify, UploadShape};
pub use collision::CollisionResolver;
pub use orchestrator::{FileFailure, UploadOutcome, Uploader};

use spool::SpoolFile;

/// Content type used when the client does not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("Unsupported upload shape: {0}")]
    UnsupportedShape(String),

    #[error("No files were uploaded")]
    EmptyUpload,

    #[error("Invalid multipart request: {0}")]
    InvalidMultipart(String),

    #[error("Payload too large: {0}")]
    PayloadTooLarge(String),

    #[error("No free storage key for '{key}' after {attempts} attempts")]
    CollisionBoundExceeded { key: String, attempts: usize },

    #[error(transparent)]
    Storage(#[from] StorageError),

    #[error("IO error: {0}")]
    IoError(#[from] io::Error),

    /// Failure of one named file, carrying where it was sent
    #[error("{field} '{filename}': {source}")]
    File {
        field: String,
        filename: String,
        source: Box<UploadError>,
    },
}

impl UploadError {
    /// HTTP status code reported to the client
    pub fn status_code(&self) -> u16 {
        match self {
            UploadError::UnsupportedShape(_)
            | UploadError::EmptyUpload
            | UploadError::InvalidMultipart(_) => 400,
            UploadError::PayloadTooLarge(_) => 413,
            UploadError::CollisionBoundExceeded { .. } => 409,
            UploadError::Storage(StorageError::QuotaExceeded(_)) => 507,
            UploadError::Storage(StorageError::Unavailable(_)) => 503,
            UploadError::Storage(_) | UploadError::IoError(_) => 500,
            UploadError::File { source, .. } => source.status_code(),
        }
    }

    /// Underlying error, with any file context removed
    pub fn root(&self) -> &UploadError {
        match self {
            UploadError::File { source, .. } => source.root(),
            other => other,
        }
    }

    /// Message safe to show to clients
    pub fn client_message(&self) -> String {
        match self {
            UploadError::IoError(_) | UploadError::Storage(StorageError::Body(_)) => {
                "Failed to read uploaded file".to_string()
            }
            UploadError::Storage(StorageError::Config(_)) => {
                "Storage backend is misconfigured".to_string()
            }
            UploadError::File {
                field,
                filename,
                source,
            } => format!("{} '{}': {}", field, filename, source.client_message()),
            other => other.to_string(),
        }
    }
}

/// Bytes of one uploaded file
#[derive(Debug)]
pub enum FileBody {
    /// Held in memory
    Memory(Bytes),
    /// Spooled to a temporary file during intake
    Spooled(SpoolFile),
}

impl FileBody {
    /// Length in bytes
    pub fn len(&self) -> u64 {
        match self {
            FileBody::Memory(bytes) => bytes.len() as u64,
            FileBody::Spooled(spool) => spool.size(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Hex SHA-256 recorded while spooling
    pub fn content_hash(&self) -> Option<&str> {
        match self {
            FileBody::Memory(_) => None,
            FileBody::Spooled(spool) => Some(spool.content_hash()),
        }
    }

    /// Open a fresh stream over the content. Spooled bodies are read from
    /// disk in chunks, never loaded whole.
    pub async fn open_stream(&self) -> io::Result<BoxStream<'static, io::Result<Bytes>>> {
        match self {
            FileBody::Memory(bytes) => {
                let bytes = bytes.clone();
                Ok(stream::once(async move { Ok(bytes) }).boxed())
            }
            FileBody::Spooled(spool) => {
                let file = tokio::fs::File::open(spool.path()).await?;
                Ok(tokio_util::io::ReaderStream::new(file).boxed())
            }
        }
    }

    /// Read the whole content
    pub async fn read_all(&self) -> io::Result<Bytes> {
        match self {
            FileBody::Memory(bytes) => Ok(bytes.clone()),
            FileBody::Spooled(spool) => tokio::fs::read(spool.path()).await.map(Bytes::from),
        }
    }
}

/// One file received in an upload request
#[derive(Debug)]
pub struct IncomingFile {
    original_filename: String,
    content_type: String,
    body: FileBody,
}

impl IncomingFile {
    /// File held in memory
    pub fn in_memory(
        original_filename: impl Into<String>,
        content_type: impl Into<String>,
        data: impl Into<Bytes>,
    ) -> Self {
        Self::new(original_filename, content_type, FileBody::Memory(data.into()))
    }

    /// File spooled to disk
    pub fn spooled(
        original_filename: impl Into<String>,
        content_type: impl Into<String>,
        spool: SpoolFile,
    ) -> Self {
        Self::new(original_filename, content_type, FileBody::Spooled(spool))
    }

    fn new(
        original_filename: impl Into<String>,
        content_type: impl Into<String>,
        body: FileBody,
    ) -> Self {
        let content_type = content_type.into();
        Self {
            original_filename: original_filename.into(),
            content_type: if content_type.trim().is_empty() {
                DEFAULT_CONTENT_TYPE.to_string()
            } else {
                content_type
            },
            body,
        }
    }

    pub fn original_filename(&self) -> &str {
        &self.original_filename
    }

    pub fn content_type(&self) -> &str {
        &self.content_type
    }

    pub fn body(&self) -> &FileBody {
        &self.body
    }

    pub fn size(&self) -> u64 {
        self.body.len()
    }
}

/// Per-request upload options
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Destination namespace
    pub folder: String,
    pub preserve_original_name: bool,
    pub prevent_overwrite: bool,
}

impl UploadOptions {
    /// Reject a folder that leaves no room for a full-length name in a key
    pub fn validate(&self) -> Result<(), UploadError> {
        let folder = normalize_folder(&self.folder);
        if folder.len() > MAX_FOLDER_BYTES {
            return Err(UploadError::InvalidMultipart(format!(
                "folder exceeds {} bytes",
                MAX_FOLDER_BYTES
            )));
        }
        Ok(())
    }

    /// Options taken from the configured defaults
    pub fn from_config(config: &UploadConfig) -> Self {
        Self {
            folder: config.default_folder.clone(),
            preserve_original_name: config.preserve_original_name,
            prevent_overwrite: config.prevent_overwrite,
        }
    }
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self::from_config(&UploadConfig::default())
    }
}

/// Named form field and the files it carried, in arrival order
#[derive(Debug)]
pub struct FileField {
    pub name: String,
    pub files: Vec<IncomingFile>,
}

/// Parsed upload request
#[derive(Debug, Default)]
pub struct UploadRequest {
    pub fields: Vec<FileField>,
    pub options: UploadOptions,
    /// Authenticated actor, recorded with every stored file
    pub actor: Option<String>,
}

impl UploadRequest {
    pub fn new(options: UploadOptions) -> Self {
        Self {
            fields: Vec::new(),
            options,
            actor: None,
        }
    }

    /// Register a field name without attaching a file to it.
    ///
    /// `files` and `files[]` are the same field; the first spelling seen is
    /// kept.
    pub fn add_field(&mut self, name: &str) -> &mut FileField {
        let canonical = classify::canonical_field_name(name);
        let position = match self
            .fields
            .iter()
            .position(|f| classify::canonical_field_name(&f.name) == canonical)
        {
            Some(position) => position,
            None => {
                self.fields.push(FileField {
                    name: name.to_string(),
                    files: Vec::new(),
                });
                self.fields.len() - 1
            }
        };
        &mut self.fields[position]
    }

    /// Append a file to the named field
    pub fn add_file(&mut self, name: &str, file: IncomingFile) {
        self.add_field(name).files.push(file);
    }

    /// Builder-style [`add_file`](Self::add_file)
    #[must_use]
    pub fn with_file(mut self, name: &str, file: IncomingFile) -> Self {
        self.add_file(name, file);
        self
    }

    #[must_use]
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Number of files across all fields
    pub fn file_count(&self) -> usize {
        self.fields.iter().map(|f| f.files.len()).sum()
    }
}

/// Record describing one stored file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    /// Public address of the stored object
    pub url: String,
    /// Name actually persisted, after normalization and collision handling
    pub filename: String,
    /// Full storage key
    pub public_id: String,
    pub content_type: String,
    pub size: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_keeps_field_order() {
        let request = UploadRequest::default()
            .with_file("coverImage", IncomingFile::in_memory("c.jpg", "image/jpeg", "c"))
            .with_file("images[]", IncomingFile::in_memory("a.jpg", "image/jpeg", "a"))
            .with_file("images[]", IncomingFile::in_memory("b.jpg", "image/jpeg", "b"));

        assert_eq!(request.fields.len(), 2);
        assert_eq!(request.fields[0].name, "coverImage");
        assert_eq!(request.fields[1].files.len(), 2);
        assert_eq!(request.fields[1].files[1].original_filename(), "b.jpg");
        assert_eq!(request.file_count(), 3);
    }

    #[test]
    fn test_bracketed_and_bare_names_share_a_field() {
        let request = UploadRequest::default()
            .with_file("files[]", IncomingFile::in_memory("a.jpg", "image/jpeg", "a"))
            .with_file("files", IncomingFile::in_memory("b.jpg", "image/jpeg", "b"))
            .with_file("files[]", IncomingFile::in_memory("c.jpg", "image/jpeg", "c"));

        assert_eq!(request.fields.len(), 1);
        assert_eq!(request.fields[0].name, "files[]");
        let names: Vec<_> = request.fields[0]
            .files
            .iter()
            .map(|f| f.original_filename())
            .collect();
        assert_eq!(names, vec!["a.jpg", "b.jpg", "c.jpg"]);
    }

    #[test]
    fn test_folder_length_bound() {
        let options = UploadOptions {
            folder: "a".repeat(MAX_FOLDER_BYTES),
            ..UploadOptions::default()
        };
        assert!(options.validate().is_ok());

        let options = UploadOptions {
            folder: "a".repeat(MAX_FOLDER_BYTES + 1),
            ..UploadOptions::default()
        };
        let err = options.validate().unwrap_err();
        assert_eq!(err.status_code(), 400);

        // separators that normalize away do not count
        let options = UploadOptions {
            folder: format!("{}{}", "/".repeat(2000), "albums"),
            ..UploadOptions::default()
        };
        assert!(options.validate().is_ok());
    }

    #[test]
    fn test_file_context_wraps_message_and_status() {
        let err = UploadError::File {
            field: "file".into(),
            filename: "cover.jpg".into(),
            source: Box::new(UploadError::Storage(StorageError::Unavailable(
                "PUT timed out".into(),
            ))),
        };
        assert_eq!(err.status_code(), 503);
        assert!(matches!(
            err.root(),
            UploadError::Storage(StorageError::Unavailable(_))
        ));
        let message = err.client_message();
        assert!(message.starts_with("file 'cover.jpg': "));
        assert!(message.contains("PUT timed out"));
    }

    #[test]
    fn test_missing_content_type_defaults() {
        let file = IncomingFile::in_memory("x.bin", "", vec![1u8, 2, 3]);
        assert_eq!(file.content_type(), DEFAULT_CONTENT_TYPE);
        assert_eq!(file.size(), 3);
    }

    #[test]
    fn test_status_codes() {
        assert_eq!(UploadError::EmptyUpload.status_code(), 400);
        assert_eq!(UploadError::UnsupportedShape("x".into()).status_code(), 400);
        assert_eq!(
            UploadError::Storage(StorageError::QuotaExceeded("full".into())).status_code(),
            507
        );
        assert_eq!(
            UploadError::Storage(StorageError::Unavailable("down".into())).status_code(),
            503
        );
        assert_eq!(
            UploadError::CollisionBoundExceeded {
                key: "k".into(),
                attempts: 3
            }
            .status_code(),
            409
        );
    }

    #[test]
    fn test_upload_result_serializes_camel_case() {
        let result = UploadResult {
            url: "https://cdn.example.com/uploads/a.jpg".into(),
            filename: "a.jpg".into(),
            public_id: "uploads/a.jpg".into(),
            content_type: "image/jpeg".into(),
            size: 10,
        };
        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["publicId"], "uploads/a.jpg");
        assert_eq!(json["contentType"], "image/jpeg");
        assert_eq!(json["size"], 10);
    }

    #[tokio::test]
    async fn test_memory_body_stream() {
        let body = FileBody::Memory(Bytes::from_static(b"abc"));
        let chunks: Vec<_> = body.open_stream().await.unwrap().collect().await;
        assert_eq!(chunks.len(), 1);
        assert_eq!(body.read_all().await.unwrap(), Bytes::from_static(b"abc"));
        assert!(body.content_hash().is_none());
    }
}
