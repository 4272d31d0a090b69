//! # Index registry
//!
//! Process-wide cache of one [`SimilarityIndex`] per document id. The
//! registry is an explicit object constructed once at startup and passed by
//! handle into whatever needs it — there is no hidden global instance.
//!
//! Each cached index sits behind its own `tokio::sync::RwLock`, which is the
//! mutual-exclusion scope the concurrency model requires: at most one
//! mutation (create/append/delete, each of which persists before releasing)
//! per document at a time, while searches take the read side and never
//! observe a torn state.
//!
//! The cache has no eviction policy; entries accumulate for the process
//! lifetime. That is an accepted limitation of the current design, carried
//! forward deliberately. `invalidate` exists for deletion correctness, not
//! memory pressure.

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{error, info};

use crate::error::SageError;
use crate::vector_index::{IndexStats, SimilarityIndex};

/// Shared handle to a per-document index and its mutation lock.
pub type SharedIndex = Arc<RwLock<SimilarityIndex>>;

/// Caches one similarity index per document, loading lazily from the index
/// directory on first access.
pub struct IndexRegistry {
    index_dir: PathBuf,
    stores: RwLock<HashMap<String, SharedIndex>>,
}

impl IndexRegistry {
    pub fn new(index_dir: PathBuf) -> Self {
        Self {
            index_dir,
            stores: RwLock::new(HashMap::new()),
        }
    }

    pub fn index_dir(&self) -> &PathBuf {
        &self.index_dir
    }

    /// Return the cached index for `document_id`, or construct one, attempt
    /// to load it from disk, and cache it **regardless of load outcome** —
    /// repeated lookups for a document with no artifacts must not re-hit the
    /// filesystem.
    ///
    /// A corrupt on-disk index is deleted here rather than served; the next
    /// indexing pass rebuilds it from scratch.
    pub async fn get_or_load(
        &self,
        document_id: &str,
        dimension: usize,
    ) -> Result<SharedIndex, SageError> {
        if let Some(existing) = self.stores.read().await.get(document_id) {
            return Ok(Arc::clone(existing));
        }

        let mut stores = self.stores.write().await;
        // Lost the race: another task cached it while we waited.
        if let Some(existing) = stores.get(document_id) {
            return Ok(Arc::clone(existing));
        }

        let mut index = SimilarityIndex::new(document_id, dimension, &self.index_dir)?;
        match index.load() {
            Ok(_) => {}
            Err(corrupt @ SageError::Corruption { .. }) => {
                error!(document_id, %corrupt, "corrupt index artifacts; deleting for rebuild");
                index.delete()?;
            }
            Err(other) => return Err(other),
        }

        let shared: SharedIndex = Arc::new(RwLock::new(index));
        stores.insert(document_id.to_string(), Arc::clone(&shared));
        Ok(shared)
    }

    /// Drop the cache entry for `document_id`, if any. The next access goes
    /// back to disk.
    pub async fn invalidate(&self, document_id: &str) {
        self.stores.write().await.remove(document_id);
    }

    /// Delete a document's index: durable artifacts first, cache entry
    /// immediately after, so a deleted document's stale index is never
    /// served. Idempotent.
    pub async fn delete(&self, document_id: &str, dimension: usize) -> Result<(), SageError> {
        let shared = self.get_or_load(document_id, dimension).await?;
        {
            let mut index = shared.write().await;
            index.delete()?;
        }
        self.invalidate(document_id).await;
        info!(document_id, "index removed from disk and cache");
        Ok(())
    }

    /// Stats for observability surfaces.
    pub async fn stats(&self, document_id: &str, dimension: usize) -> Result<IndexStats, SageError> {
        let shared = self.get_or_load(document_id, dimension).await?;
        let index = shared.read().await;
        Ok(index.stats())
    }

    /// Document ids with index artifacts on disk, derived from the vector
    /// blobs in the index directory.
    pub fn list_available(&self) -> Vec<String> {
        let Ok(entries) = fs::read_dir(&self.index_dir) else {
            return Vec::new();
        };

        let mut ids: Vec<String> = entries
            .flatten()
            .filter_map(|entry| {
                let name = entry.file_name().to_string_lossy().into_owned();
                name.strip_suffix(".vectors.bin").map(str::to_string)
            })
            .collect();
        ids.sort();
        ids
    }
}
