//! Temporary spool files for uploaded parts
//!
//! The multipart body is read once. Each file part is written chunk by chunk
//! into a spool file so that memory stays bounded no matter how large the
//! gallery is, and the request can be classified before anything reaches the
//! storage backend.
//!
//! # Flow
//!
//! 1. [`SpoolWriter::create`] opens a uniquely named file in the spool dir
//! 2. [`SpoolWriter::write`] appends chunks while hashing them (SHA256)
//! 3. [`SpoolWriter::finish`] returns a [`SpoolFile`], removed on drop

use bytes::Bytes;
use sha2::{Digest, Sha256};
use std::io;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

/// Finished spool file. The file is deleted when this value is dropped.
#[derive(Debug)]
pub struct SpoolFile {
    path: PathBuf,
    size: u64,
    content_hash: String,
}

impl SpoolFile {
    /// Spool an in-memory buffer (used by tests and small bodies)
    pub async fn from_bytes(dir: &Path, data: Bytes) -> io::Result<Self> {
        let mut writer = SpoolWriter::create(dir).await?;
        writer.write(&data).await?;
        writer.finish().await
    }

    /// Get the path to the spool file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Get the size of the file in bytes
    pub fn size(&self) -> u64 {
        self.size
    }

    /// SHA256 of the content (hex encoded)
    pub fn content_hash(&self) -> &str {
        &self.content_hash
    }
}

impl Drop for SpoolFile {
    fn drop(&mut self) {
        remove_quietly(&self.path);
    }
}

/// Incremental writer for a spool file
pub struct SpoolWriter {
    path: Option<PathBuf>,
    file: tokio::fs::File,
    hasher: Sha256,
    size: u64,
}

impl SpoolWriter {
    /// Create a new spool file in `dir`
    pub async fn create(dir: &Path) -> io::Result<Self> {
        let path = dir.join(format!("media-uploadr-{}.part", uuid::Uuid::new_v4()));
        let file = tokio::fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .await?;

        Ok(Self {
            path: Some(path),
            file,
            hasher: Sha256::new(),
            size: 0,
        })
    }

    /// Bytes written so far
    pub fn size(&self) -> u64 {
        self.size
    }

    /// Append a chunk
    pub async fn write(&mut self, chunk: &[u8]) -> io::Result<()> {
        self.file.write_all(chunk).await?;
        self.hasher.update(chunk);
        self.size += chunk.len() as u64;
        Ok(())
    }

    /// Flush and hand the file over to a [`SpoolFile`]
    pub async fn finish(mut self) -> io::Result<SpoolFile> {
        self.file.flush().await?;
        self.file.sync_data().await?;

        let path = self
            .path
            .take()
            .ok_or_else(|| io::Error::other("spool writer already finished"))?;
        let hasher = std::mem::take(&mut self.hasher);

        Ok(SpoolFile {
            path,
            size: self.size,
            content_hash: hex::encode(hasher.finalize()),
        })
    }
}

impl Drop for SpoolWriter {
    fn drop(&mut self) {
        // Abandoned before finish (client abort, size limit)
        if let Some(path) = self.path.take() {
            remove_quietly(&path);
        }
    }
}

fn remove_quietly(path: &Path) {
    if let Err(e) = std::fs::remove_file(path) {
        if e.kind() != io::ErrorKind::NotFound {
            tracing::warn!(
                path = %path.display(),
                error = %e,
                "Failed to clean up spool file"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_spool_from_bytes() {
        let dir = tempfile::tempdir().unwrap();
        let spool = SpoolFile::from_bytes(dir.path(), Bytes::from("test data"))
            .await
            .unwrap();

        assert!(spool.path().exists());
        assert_eq!(spool.size(), 9);
        assert_eq!(
            tokio::fs::read(spool.path()).await.unwrap(),
            b"test data".to_vec()
        );
    }

    #[tokio::test]
    async fn test_content_hash() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SpoolWriter::create(dir.path()).await.unwrap();
        writer.write(b"hel").await.unwrap();
        writer.write(b"lo").await.unwrap();
        assert_eq!(writer.size(), 5);
        let spool = writer.finish().await.unwrap();

        assert_eq!(
            spool.content_hash(),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[tokio::test]
    async fn test_cleanup_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = {
            let spool = SpoolFile::from_bytes(dir.path(), Bytes::from("temp data"))
                .await
                .unwrap();
            spool.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_abandoned_writer_is_removed() {
        let dir = tempfile::tempdir().unwrap();
        let mut writer = SpoolWriter::create(dir.path()).await.unwrap();
        writer.write(b"partial").await.unwrap();
        drop(writer);

        let mut entries = tokio::fs::read_dir(dir.path()).await.unwrap();
        assert!(entries.next_entry().await.unwrap().is_none());
    }
}
