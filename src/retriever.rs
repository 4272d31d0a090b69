//! # Query processing
//!
//! Turns a natural-language query into a ranked context set: embed the
//! query, search the document's similarity index, and package the hits in
//! descending score order together with their source references and mean
//! score.
//!
//! "Nothing relevant" is a normal outcome here, not an error — it comes
//! back as [`Retrieval::Miss`] with a typed reason, so callers can tell a
//! document that was never indexed apart from a query that genuinely
//! matched nothing above threshold. The error channel is reserved for
//! embedding/index failures that merit a retry or an operator's attention.

use serde::Serialize;
use std::sync::Arc;
use tracing::info;

use crate::error::SageError;
use crate::indexer::DocumentIndexer;

/// Why a query produced no contexts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum MissReason {
    /// No index exists for the document (never indexed, or deleted).
    IndexAbsent,
    /// The index was searched but nothing scored at or above `min_score`.
    BelowThreshold,
}

impl MissReason {
    /// User-facing phrasing for the miss.
    pub fn message(self) -> &'static str {
        match self {
            MissReason::IndexAbsent => "no index exists for this document",
            MissReason::BelowThreshold => "no relevant content found in the document",
        }
    }
}

/// Reference back to the chunk a context came from.
#[derive(Debug, Clone, Serialize)]
pub struct SourceRef {
    pub chunk_id: usize,
    pub similarity_score: f32,
    pub word_count: usize,
}

/// A successful retrieval: contexts and sources in descending score order.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalSet {
    pub contexts: Vec<String>,
    pub sources: Vec<SourceRef>,
    pub total_found: usize,
    pub average_score: f32,
}

/// Tagged outcome of a query.
#[derive(Debug, Clone, Serialize)]
pub enum Retrieval {
    Hit(RetrievalSet),
    Miss(MissReason),
}

/// Embeds queries and assembles ranked context sets from the index.
pub struct QueryProcessor {
    indexer: Arc<DocumentIndexer>,
}

impl QueryProcessor {
    pub fn new(indexer: Arc<DocumentIndexer>) -> Self {
        Self { indexer }
    }

    /// Retrieve up to `max_chunks` contexts for `query` against
    /// `document_id`, keeping only hits scoring at least `min_score`.
    ///
    /// The returned contexts preserve the index's descending-score order;
    /// `average_score` is the arithmetic mean over the returned hits.
    pub async fn process_query(
        &self,
        document_id: &str,
        query: &str,
        max_chunks: usize,
        min_score: f32,
    ) -> Result<Retrieval, SageError> {
        let outcome = self
            .indexer
            .search_similar_chunks(document_id, query, max_chunks, min_score)
            .await?;

        if outcome.results.is_empty() {
            let reason = if outcome.index_loaded {
                MissReason::BelowThreshold
            } else {
                MissReason::IndexAbsent
            };
            info!(document_id, ?reason, "query matched no contexts");
            return Ok(Retrieval::Miss(reason));
        }

        let total_found = outcome.results.len();
        let average_score =
            outcome.results.iter().map(|r| r.score).sum::<f32>() / total_found as f32;

        let mut contexts = Vec::with_capacity(total_found);
        let mut sources = Vec::with_capacity(total_found);
        for result in &outcome.results {
            contexts.push(result.chunk.content.clone());
            sources.push(SourceRef {
                chunk_id: result.chunk.chunk_id,
                similarity_score: result.score,
                word_count: result.chunk.word_count,
            });
        }

        info!(document_id, total_found, average_score, "query matched contexts");
        Ok(Retrieval::Hit(RetrievalSet {
            contexts,
            sources,
            total_found,
            average_score,
        }))
    }
}
