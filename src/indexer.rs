//! # Document indexing service
//!
//! Ties the pipeline together on the write path: chunk the document text,
//! embed every chunk, and append the (vector, chunk) pairs to the document's
//! similarity index through the registry. Also the read path's entry point
//! (`search_similar_chunks`) and the owner of the timeout policy around
//! embedder calls.
//!
//! Mutations hold the per-document write lock for the whole
//! append-and-persist span, so two concurrent indexing passes for the same
//! document serialize instead of interleaving. Vector math (normalization
//! and the similarity scan) runs on the blocking pool, off the async
//! request-handling threads.

use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::info;

use crate::chunker::TextChunker;
use crate::embedding::Embedder;
use crate::error::SageError;
use crate::registry::IndexRegistry;
use crate::vector_index::{IndexStats, RetrievalResult};

/// Outcome of one indexing pass.
#[derive(Debug, Clone, Serialize)]
pub struct IndexReport {
    pub document_id: String,
    /// Chunks added by this pass.
    pub chunks_indexed: usize,
    /// Chunks in the index after this pass (previous passes included).
    pub total_chunks: usize,
    pub embedding_dimension: usize,
    pub elapsed_seconds: f64,
    pub statistics: IndexStatistics,
}

/// Aggregate shape of the chunks added by one pass.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStatistics {
    pub total_characters: usize,
    pub total_words: usize,
    pub mean_chunk_characters: f32,
}

/// Result of a similarity search, with the index's load state so callers can
/// tell "no index exists" apart from "nothing scored above threshold".
#[derive(Debug)]
pub struct SearchOutcome {
    pub index_loaded: bool,
    pub results: Vec<RetrievalResult>,
}

/// Indexing and search service for a single embedder + registry pair.
pub struct DocumentIndexer {
    embedder: Arc<dyn Embedder>,
    registry: Arc<IndexRegistry>,
    chunker: TextChunker,
    request_timeout: Duration,
}

impl DocumentIndexer {
    pub fn new(
        embedder: Arc<dyn Embedder>,
        registry: Arc<IndexRegistry>,
        chunker: TextChunker,
        request_timeout: Duration,
    ) -> Self {
        Self {
            embedder,
            registry,
            chunker,
            request_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<IndexRegistry> {
        &self.registry
    }

    pub fn embedder(&self) -> &Arc<dyn Embedder> {
        &self.embedder
    }

    /// Chunk `text`, embed every chunk, and append to `document_id`'s index
    /// (creating it on first indexing). The whole mutation is all-or-nothing:
    /// an embedding failure or timeout commits nothing.
    ///
    /// # Errors
    /// - `Validation` when the document yields no chunks.
    /// - `Timeout` / `Embedding` from the embedder call.
    /// - Index errors from the append (dimension mismatch, I/O).
    pub async fn index_document(
        &self,
        document_id: &str,
        text: &str,
        document_name: &str,
    ) -> Result<IndexReport, SageError> {
        let started = Instant::now();
        info!(document_id, document_name, "indexing document");

        let chunks = self.chunker.chunk(text, document_name);
        if chunks.is_empty() {
            return Err(SageError::Validation(
                "document produced no chunks".to_string(),
            ));
        }

        let contents: Vec<String> = chunks.iter().map(|c| c.content.clone()).collect();
        let vectors = self
            .with_timeout("embedding", self.embedder.encode(&contents))
            .await?;

        let dimension = self.embedder.dimension()?;
        let statistics = IndexStatistics {
            total_characters: chunks.iter().map(|c| c.char_count).sum(),
            total_words: chunks.iter().map(|c| c.word_count).sum(),
            mean_chunk_characters: chunks.iter().map(|c| c.char_count).sum::<usize>() as f32
                / chunks.len() as f32,
        };
        let chunks_indexed = chunks.len();

        let shared = self.registry.get_or_load(document_id, dimension).await?;
        let total_chunks = tokio::task::spawn_blocking(move || {
            let mut index = shared.blocking_write();
            // Ids continue from the existing tail so they stay unique within
            // the document across re-indexing passes.
            let base = index.len();
            let chunks = chunks
                .into_iter()
                .enumerate()
                .map(|(i, chunk)| crate::chunker::Chunk {
                    chunk_id: base + i,
                    ..chunk
                })
                .collect();
            index.append(vectors, chunks)?;
            Ok::<usize, SageError>(index.len())
        })
        .await
        .map_err(|e| SageError::Internal(format!("index task failed: {e}")))??;

        let elapsed_seconds = started.elapsed().as_secs_f64();
        info!(
            document_id,
            chunks_indexed, total_chunks, elapsed_seconds, "document indexed"
        );

        Ok(IndexReport {
            document_id: document_id.to_string(),
            chunks_indexed,
            total_chunks,
            embedding_dimension: dimension,
            elapsed_seconds,
            statistics,
        })
    }

    /// Embed `query_text` and scan `document_id`'s index for the `k` most
    /// similar chunks scoring at least `min_score`.
    pub async fn search_similar_chunks(
        &self,
        document_id: &str,
        query_text: &str,
        k: usize,
        min_score: f32,
    ) -> Result<SearchOutcome, SageError> {
        let query = vec![query_text.to_string()];
        let mut vectors = self
            .with_timeout("query embedding", self.embedder.encode(&query))
            .await?;
        let query_vector = vectors
            .pop()
            .ok_or_else(|| SageError::Embedding("embedder returned no vector".to_string()))?;

        let dimension = self.embedder.dimension()?;
        let shared = self.registry.get_or_load(document_id, dimension).await?;

        let outcome = tokio::task::spawn_blocking(move || {
            let index = shared.blocking_read();
            let results = index.search(&query_vector, k, min_score)?;
            Ok::<SearchOutcome, SageError>(SearchOutcome {
                index_loaded: index.is_loaded(),
                results,
            })
        })
        .await
        .map_err(|e| SageError::Internal(format!("search task failed: {e}")))??;

        info!(
            document_id,
            hits = outcome.results.len(),
            "similarity search completed"
        );
        Ok(outcome)
    }

    /// Remove the document's index from disk and cache.
    pub async fn delete_document_index(&self, document_id: &str) -> Result<(), SageError> {
        let dimension = self.embedder.dimension()?;
        self.registry.delete(document_id, dimension).await
    }

    pub async fn index_stats(&self, document_id: &str) -> Result<IndexStats, SageError> {
        let dimension = self.embedder.dimension()?;
        self.registry.stats(document_id, dimension).await
    }

    pub fn list_indexed_documents(&self) -> Vec<String> {
        self.registry.list_available()
    }

    async fn with_timeout<T>(
        &self,
        operation: &'static str,
        fut: impl Future<Output = Result<T, SageError>>,
    ) -> Result<T, SageError> {
        let seconds = self.request_timeout.as_secs();
        match tokio::time::timeout(self.request_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(SageError::Timeout { operation, seconds }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;
    use tempfile::tempdir;

    /// Deterministic embedder: every distinct text gets its own one-hot
    /// basis vector, so identical texts score 1.0 and different texts 0.0.
    struct StubEmbedder {
        dimension: usize,
        slots: Mutex<HashMap<String, usize>>,
        delay: Option<Duration>,
    }

    impl StubEmbedder {
        fn new(dimension: usize) -> Self {
            Self {
                dimension,
                slots: Mutex::new(HashMap::new()),
                delay: None,
            }
        }

        fn slow(dimension: usize, delay: Duration) -> Self {
            Self {
                delay: Some(delay),
                ..Self::new(dimension)
            }
        }
    }

    #[async_trait]
    impl Embedder for StubEmbedder {
        fn dimension(&self) -> Result<usize, SageError> {
            Ok(self.dimension)
        }

        async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SageError> {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let mut slots = self.slots.lock().unwrap();
            Ok(texts
                .iter()
                .map(|text| {
                    let next = slots.len();
                    let slot = *slots.entry(text.clone()).or_insert(next);
                    let mut vector = vec![0.0; self.dimension];
                    vector[slot % self.dimension] = 1.0;
                    vector
                })
                .collect())
        }
    }

    fn indexer_in(dir: &std::path::Path) -> DocumentIndexer {
        DocumentIndexer::new(
            Arc::new(StubEmbedder::new(16)),
            Arc::new(IndexRegistry::new(dir.to_path_buf())),
            TextChunker::new(30, 0),
            Duration::from_secs(5),
        )
    }

    /// Five short paragraphs become five chunks; querying with the exact
    /// text of the third returns it first with a score of ~1.0.
    #[tokio::test]
    async fn exact_text_query_returns_its_own_chunk_first() {
        let dir = tempdir().unwrap();
        let indexer = indexer_in(dir.path());

        let paragraphs = [
            "the first paragraph here",
            "the second paragraph here",
            "the third paragraph here",
            "the fourth paragraph here",
            "the fifth paragraph here",
        ];
        let text = paragraphs.join("\n\n");
        let report = indexer.index_document("doc", &text, "doc.txt").await.unwrap();
        assert_eq!(report.chunks_indexed, 5);
        assert_eq!(report.total_chunks, 5);
        assert_eq!(report.embedding_dimension, 16);

        let outcome = indexer
            .search_similar_chunks("doc", paragraphs[2], 5, 0.9)
            .await
            .unwrap();
        assert!(outcome.index_loaded);
        assert_eq!(outcome.results.len(), 1);
        assert_eq!(outcome.results[0].chunk.chunk_id, 2);
        assert!((outcome.results[0].score - 1.0).abs() < 1e-5);
        assert_eq!(outcome.results[0].rank, 1);
    }

    #[tokio::test]
    async fn empty_document_is_rejected_up_front() {
        let dir = tempdir().unwrap();
        let indexer = indexer_in(dir.path());
        let err = indexer.index_document("doc", "   \n\n ", "doc.txt").await.unwrap_err();
        assert!(matches!(err, SageError::Validation(_)));
    }

    #[tokio::test]
    async fn searching_a_never_indexed_document_reports_absent() {
        let dir = tempdir().unwrap();
        let indexer = indexer_in(dir.path());
        let outcome = indexer
            .search_similar_chunks("ghost", "anything", 5, 0.1)
            .await
            .unwrap();
        assert!(!outcome.index_loaded);
        assert!(outcome.results.is_empty());
    }

    #[tokio::test]
    async fn reindexing_appends_rather_than_replacing() {
        let dir = tempdir().unwrap();
        let indexer = indexer_in(dir.path());

        indexer.index_document("doc", "first pass text", "doc.txt").await.unwrap();
        let report = indexer
            .index_document("doc", "second pass text", "doc.txt")
            .await
            .unwrap();
        assert_eq!(report.chunks_indexed, 1);
        assert_eq!(report.total_chunks, 2);
    }

    /// Two concurrent indexing passes for the same document serialize on the
    /// per-document write lock; the final index holds both batches and the
    /// parallel-array invariant is intact.
    #[tokio::test]
    async fn concurrent_appends_never_tear_the_index() {
        let dir = tempdir().unwrap();
        let indexer = Arc::new(indexer_in(dir.path()));

        let a = {
            let indexer = Arc::clone(&indexer);
            tokio::spawn(async move {
                indexer
                    .index_document("doc", "left side content", "doc.txt")
                    .await
            })
        };
        let b = {
            let indexer = Arc::clone(&indexer);
            tokio::spawn(async move {
                indexer
                    .index_document("doc", "right side content", "doc.txt")
                    .await
            })
        };
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let stats = indexer.index_stats("doc").await.unwrap();
        assert_eq!(stats.total_chunks, 2);
        assert!(stats.loaded);

        // Both chunks are individually retrievable: vectors and metadata
        // stayed paired up.
        for query in ["left side content", "right side content"] {
            let outcome = indexer.search_similar_chunks("doc", query, 5, 0.9).await.unwrap();
            assert_eq!(outcome.results.len(), 1);
            assert_eq!(outcome.results[0].chunk.content, query);
        }
    }

    #[tokio::test]
    async fn deletion_clears_stats_and_listing() {
        let dir = tempdir().unwrap();
        let indexer = indexer_in(dir.path());

        indexer.index_document("doc", "some content", "doc.txt").await.unwrap();
        assert_eq!(indexer.list_indexed_documents(), vec!["doc".to_string()]);

        indexer.delete_document_index("doc").await.unwrap();
        assert!(indexer.list_indexed_documents().is_empty());
        let stats = indexer.index_stats("doc").await.unwrap();
        assert!(!stats.loaded);
        assert_eq!(stats.total_chunks, 0);
    }

    /// A timed-out embedder call surfaces as a retryable failure and commits
    /// no partial mutation.
    #[tokio::test]
    async fn embedder_timeout_commits_nothing() {
        let dir = tempdir().unwrap();
        let indexer = DocumentIndexer::new(
            Arc::new(StubEmbedder::slow(16, Duration::from_millis(250))),
            Arc::new(IndexRegistry::new(dir.path().to_path_buf())),
            TextChunker::new(30, 0),
            Duration::from_millis(20),
        );

        let err = indexer
            .index_document("doc", "some content", "doc.txt")
            .await
            .unwrap_err();
        assert!(matches!(err, SageError::Timeout { .. }));
        assert!(err.is_retryable());

        let stats = indexer.index_stats("doc").await.unwrap();
        assert_eq!(stats.total_chunks, 0);
    }
}
