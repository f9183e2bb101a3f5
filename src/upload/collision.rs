//! Collision resolution
//!
//! Decides the final key for a file when overwrite protection is on. The
//! existence check and the later write are two separate backend calls; two
//! requests racing for the same candidate can both see it as free, in which
//! case the backend's last write wins. Conditional writes are not used.

use super::UploadError;
use crate::metrics;
use crate::storage::{StorageError, StorageKey};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;

/// Finds a free key by appending `-1`, `-2`, ... to the candidate name
#[derive(Debug, Clone)]
pub struct CollisionResolver {
    max_attempts: usize,
}

impl CollisionResolver {
    /// `max_attempts` counts existence checks, the bare candidate included
    pub fn new(max_attempts: usize) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> usize {
        self.max_attempts
    }

    /// Resolve `candidate` to the key that will be written.
    ///
    /// Without `prevent_overwrite` the candidate is returned as is and
    /// `exists` is never called.
    #[tracing::instrument(
        name = "upload.resolve_key",
        skip(self, exists),
        fields(candidate = %candidate, attempts = tracing::field::Empty),
        err
    )]
    pub async fn resolve<F, Fut>(
        &self,
        candidate: StorageKey,
        prevent_overwrite: bool,
        mut exists: F,
    ) -> Result<StorageKey, UploadError>
    where
        F: FnMut(&StorageKey) -> Fut,
        Fut: Future<Output = Result<bool, StorageError>>,
    {
        if !prevent_overwrite {
            return Ok(candidate);
        }

        for attempt in 0..self.max_attempts {
            let key = if attempt == 0 {
                candidate.clone()
            } else {
                candidate.with_suffix(attempt)
            };

            if !exists(&key).await? {
                tracing::Span::current().record("attempts", attempt + 1);
                if attempt > 0 {
                    metrics::record_collision_renamed();
                    tracing::debug!(final_key = %key, "Renamed to avoid overwrite");
                }
                return Ok(key);
            }
        }

        metrics::record_collision_exhausted();
        Err(UploadError::CollisionBoundExceeded {
            key: candidate.to_string(),
            attempts: self.max_attempts,
        })
    }
}

/// Keys claimed by files of one request, so that two same-named files stored
/// concurrently do not both pick the same free key.
#[derive(Debug, Default)]
pub struct KeyReservations {
    claimed: Mutex<HashSet<String>>,
}

impl KeyReservations {
    /// Claim `key`; `false` if another file of this request already holds it
    pub fn try_claim(&self, key: &StorageKey) -> bool {
        self.claimed.lock().insert(key.as_str().to_string())
    }
}
