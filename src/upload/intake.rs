//! Multipart intake
//!
//! Reads a `multipart/form-data` body into an [`UploadRequest`]. File parts are
//! spooled to disk as they arrive and size limits are enforced while reading,
//! so an oversized upload fails before anything reaches a storage backend.
//!
//! # Form fields
//!
//! | Field | Kind | Meaning |
//! |-------|------|---------|
//! | `folder` | text | Destination folder (default from config) |
//! | `preserveOriginalName` | text | `true` / `false` |
//! | `preventOverwrite` | text | `true` / `false` |
//! | `file`, `files[]`, `coverImage`, `images[]` | file | Uploaded files |
//!
//! Any other part name is recorded as a field so that classification can
//! reject it.

use super::spool::SpoolWriter;
use super::{IncomingFile, UploadError, UploadOptions, UploadRequest};
use crate::config::UploadConfig;
use bytes::Bytes;
use futures::Stream;
use multer::{Field, Multipart};

pub const FIELD_FOLDER: &str = "folder";
pub const FIELD_PRESERVE_ORIGINAL_NAME: &str = "preserveOriginalName";
pub const FIELD_PREVENT_OVERWRITE: &str = "preventOverwrite";

/// Longest accepted value of a text part
const MAX_TEXT_FIELD_BYTES: usize = 4096;

/// Read a multipart body into an [`UploadRequest`] with options defaulted
/// from `config`
pub async fn read_multipart<S, O, E>(
    stream: S,
    boundary: &str,
    config: &UploadConfig,
) -> Result<UploadRequest, UploadError>
where
    S: Stream<Item = Result<O, E>> + Send + 'static,
    O: Into<Bytes> + 'static,
    E: Into<Box<dyn std::error::Error + Send + Sync>> + 'static,
{
    let spool_dir = config.spool_dir.clone().unwrap_or_else(std::env::temp_dir);
    let mut request = UploadRequest::new(UploadOptions::from_config(config));
    let mut multipart = Multipart::new(stream, boundary);

    while let Some(mut field) = multipart.next_field().await.map_err(map_multer_error)? {
        let name = field.name().unwrap_or_default().to_string();

        let Some(file_name) = field.file_name().map(str::to_string) else {
            let value = read_text(&mut field, &name).await?;
            apply_text_field(&mut request, &name, &value)?;
            continue;
        };

        if name.is_empty() {
            return Err(UploadError::InvalidMultipart(
                "file part without a field name".into(),
            ));
        }
        if request.file_count() >= config.max_files {
            return Err(UploadError::PayloadTooLarge(format!(
                "at most {} files per request",
                config.max_files
            )));
        }

        let content_type = field
            .content_type()
            .map(|mime| mime.to_string())
            .unwrap_or_default();

        let mut writer = SpoolWriter::create(&spool_dir).await?;
        while let Some(chunk) = field.chunk().await.map_err(map_multer_error)? {
            if writer.size() + chunk.len() as u64 > config.max_file_size {
                tracing::warn!(
                    field = %name,
                    filename = %file_name,
                    limit = config.max_file_size,
                    "Rejecting oversized file"
                );
                return Err(UploadError::PayloadTooLarge(format!(
                    "file '{}' in field '{}' exceeds {} bytes",
                    file_name, name, config.max_file_size
                )));
            }
            writer.write(&chunk).await?;
        }

        // Browsers send an empty, unnamed part for a file input left blank
        if file_name.is_empty() && writer.size() == 0 {
            request.add_field(&name);
            continue;
        }

        let spool = writer.finish().await?;
        tracing::debug!(
            field = %name,
            filename = %file_name,
            size = spool.size(),
            sha256 = %spool.content_hash(),
            "Spooled file part"
        );
        request.add_file(&name, IncomingFile::spooled(file_name, content_type, spool));
    }

    Ok(request)
}

fn apply_text_field(
    request: &mut UploadRequest,
    name: &str,
    value: &str,
) -> Result<(), UploadError> {
    match name {
        FIELD_FOLDER => {
            if !value.trim().is_empty() {
                request.options.folder = value.trim().to_string();
                request.options.validate()?;
            }
        }
        FIELD_PRESERVE_ORIGINAL_NAME => {
            if let Some(flag) = parse_flag(name, value)? {
                request.options.preserve_original_name = flag;
            }
        }
        FIELD_PREVENT_OVERWRITE => {
            if let Some(flag) = parse_flag(name, value)? {
                request.options.prevent_overwrite = flag;
            }
        }
        _ => {
            request.add_field(name);
        }
    }
    Ok(())
}

/// Parse a boolean form value. Blank means "use the default".
pub fn parse_flag(name: &str, value: &str) -> Result<Option<bool>, UploadError> {
    let value = value.trim();
    if value.is_empty() {
        Ok(None)
    } else if value.eq_ignore_ascii_case("true") {
        Ok(Some(true))
    } else if value.eq_ignore_ascii_case("false") {
        Ok(Some(false))
    } else {
        Err(UploadError::InvalidMultipart(format!(
            "field '{}' must be 'true' or 'false', got '{}'",
            name, value
        )))
    }
}

async fn read_text(field: &mut Field<'_>, name: &str) -> Result<String, UploadError> {
    let mut buf = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(map_multer_error)? {
        if buf.len() + chunk.len() > MAX_TEXT_FIELD_BYTES {
            return Err(UploadError::PayloadTooLarge(format!(
                "field '{}' exceeds {} bytes",
                name, MAX_TEXT_FIELD_BYTES
            )));
        }
        buf.extend_from_slice(&chunk);
    }

    String::from_utf8(buf)
        .map_err(|_| UploadError::InvalidMultipart(format!("field '{}' is not valid UTF-8", name)))
}

fn map_multer_error(err: multer::Error) -> UploadError {
    match err {
        multer::Error::FieldSizeExceeded { .. } | multer::Error::StreamSizeExceeded { .. } => {
            UploadError::PayloadTooLarge(err.to_string())
        }
        other => UploadError::InvalidMultipart(other.to_string()),
    }
}
