//! Error taxonomy for the doc_sage core.
//!
//! Every public operation in this crate returns a structured result; no
//! collaborator error (embedding model, generation API, disk) escapes
//! untranslated. "Not found" conditions — a document with no index, a
//! query with no chunks above threshold — are **not** errors here: they
//! flow through [`crate::retriever::Retrieval::Miss`] and the boolean
//! result of [`crate::vector_index::SimilarityIndex::load`].

use std::path::PathBuf;
use thiserror::Error;

/// Failure modes of the retrieval pipeline.
#[derive(Debug, Error)]
pub enum SageError {
    /// Caller-supplied input was rejected before any work happened.
    /// Never retryable.
    #[error("validation failed: {0}")]
    Validation(String),

    /// A vector's width did not match the index's configured dimension.
    #[error("embedding dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// The parallel vector/chunk arrays of a persisted index disagree.
    /// Fatal to that document's index; it must be deleted and rebuilt.
    #[error("index corrupted for document '{document_id}': {detail}")]
    Corruption { document_id: String, detail: String },

    /// The embedding model failed to load or to encode.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The generation backend returned an error. Retryable.
    #[error("generation failed: {0}")]
    Generation(String),

    /// An external call exceeded its deadline. Retryable; no partial
    /// index mutation was committed.
    #[error("{operation} timed out after {seconds}s")]
    Timeout { operation: &'static str, seconds: u64 },

    /// Disk I/O on index artifacts failed.
    #[error("i/o error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Catastrophic internal failure (a worker task died).
    #[error("internal error: {0}")]
    Internal(String),
}

impl SageError {
    /// True for failures a caller may reasonably retry whole-sale.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            SageError::Embedding(_)
                | SageError::Generation(_)
                | SageError::Timeout { .. }
                | SageError::Io { .. }
        )
    }
}
