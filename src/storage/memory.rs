//! In-process storage backend for tests and local runs

use super::key::join_url;
use super::{PutOutcome, StorageBackend, StorageError, StorageKey};
use crate::config::StorageConfig;
use crate::upload::FileBody;
use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;

/// Object held by [`MemoryBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub data: Bytes,
    pub content_type: String,
}

/// Objects kept in a concurrent map
#[derive(Debug)]
pub struct MemoryBackend {
    bucket: String,
    public_url: Option<String>,
    objects: DashMap<String, StoredObject>,
}

impl MemoryBackend {
    pub fn new(bucket: impl Into<String>, public_url: Option<String>) -> Self {
        Self {
            bucket: bucket.into(),
            public_url,
            objects: DashMap::new(),
        }
    }

    pub fn from_config(config: &StorageConfig) -> Self {
        Self::new(config.bucket.clone(), config.public_url.clone())
    }

    /// Stored object under `key`
    pub fn get(&self, key: &str) -> Option<StoredObject> {
        self.objects.get(key).map(|entry| entry.value().clone())
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }

    /// All stored keys, sorted
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.objects.iter().map(|e| e.key().clone()).collect();
        keys.sort();
        keys
    }
}

#[async_trait]
impl StorageBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn put(
        &self,
        key: &StorageKey,
        body: &FileBody,
        content_type: &str,
    ) -> Result<PutOutcome, StorageError> {
        let data = body.read_all().await?;
        self.objects.insert(
            key.as_str().to_string(),
            StoredObject {
                data,
                content_type: content_type.to_string(),
            },
        );

        Ok(PutOutcome {
            url: self.public_url(key),
            etag: None,
        })
    }

    async fn exists(&self, key: &StorageKey) -> Result<bool, StorageError> {
        Ok(self.objects.contains_key(key.as_str()))
    }

    fn public_url(&self, key: &StorageKey) -> String {
        match &self.public_url {
            Some(base) => join_url(base, key),
            None => join_url(&format!("memory://{}", self.bucket), key),
        }
    }
}
