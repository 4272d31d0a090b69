//! # Similarity index
//!
//! One flat vector index per document: an ordered sequence of
//! (embedding, [`Chunk`]) pairs addressable by insertion position, searched
//! with a brute-force inner-product scan. Vectors are L2-normalized on the
//! way in, so the inner product of stored vector and normalized query is
//! their cosine similarity.
//!
//! The index persists after every mutation as two bincode blobs next to each
//! other — `<document_id>.vectors.bin` and `<document_id>.chunks.bin` —
//! written together and read together. If only one of the two is present the
//! index is treated as absent. A decoded pair whose lengths or widths
//! disagree is a corruption state: fatal to this document's index, which
//! must then be deleted and rebuilt.
//!
//! The scan is deliberately linear. Everything callers touch goes through
//! `create` / `append` / `search` / `persist` / `load` / `delete` / `stats`,
//! so an approximate index can replace the scan later without changing any
//! call site.
//!
//! ## Quick example
//! ```no_run
//! use doc_sage::vector_index::SimilarityIndex;
//! # fn main() -> Result<(), doc_sage::error::SageError> {
//! let dir = std::path::Path::new("/tmp/indexes");
//! let mut index = SimilarityIndex::new("doc-42", 384, dir)?;
//! if !index.load()? {
//!     // no artifacts on disk yet; create() will write them
//! }
//! let hits = index.search(&[0.0; 384], 5, 0.1)?;
//! # Ok(()) }
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::chunker::Chunk;
use crate::error::SageError;

/// On-disk shape of the vector blob. The dimension travels with the vectors
/// so a stale artifact written for a different embedding model is caught at
/// load time.
#[derive(Deserialize)]
struct VectorBlob {
    dimension: usize,
    vectors: Vec<Vec<f32>>,
}

/// Borrowed twin of [`VectorBlob`] for writing without cloning the vectors.
#[derive(Serialize)]
struct VectorBlobRef<'a> {
    dimension: usize,
    vectors: &'a [Vec<f32>],
}

/// One search hit: the matched chunk, its cosine similarity against the
/// query, and its 1-based position in the result ordering. Ephemeral —
/// produced per query, never persisted.
#[derive(Debug, Clone, Serialize)]
pub struct RetrievalResult {
    pub chunk: Chunk,
    pub score: f32,
    pub rank: usize,
}

/// Observability snapshot for health/stats surfaces.
#[derive(Debug, Clone, Serialize)]
pub struct IndexStats {
    pub document_id: String,
    pub loaded: bool,
    pub total_chunks: usize,
    pub dimension: usize,
}

/// Per-document flat similarity index over normalized embedding vectors.
///
/// Invariant: `vectors.len() == chunks.len()` at all times; position `i` in
/// one array corresponds to position `i` in the other, and insertion order
/// equals chunk creation order.
pub struct SimilarityIndex {
    document_id: String,
    dimension: usize,
    vectors: Vec<Vec<f32>>,
    chunks: Vec<Chunk>,
    loaded: bool,
    vectors_path: PathBuf,
    chunks_path: PathBuf,
}

impl SimilarityIndex {
    /// Construct an empty, unloaded index for `document_id`. Cheap: touches
    /// no disk. Call [`load`](Self::load) to hydrate from artifacts.
    ///
    /// # Errors
    /// `Validation` if the document id is empty or contains characters that
    /// could escape the index directory.
    pub fn new(document_id: &str, dimension: usize, index_dir: &Path) -> Result<Self, SageError> {
        validate_document_id(document_id)?;
        Ok(Self {
            document_id: document_id.to_string(),
            dimension,
            vectors: Vec::new(),
            chunks: Vec::new(),
            loaded: false,
            vectors_path: index_dir.join(format!("{document_id}.vectors.bin")),
            chunks_path: index_dir.join(format!("{document_id}.chunks.bin")),
        })
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    /// Number of (vector, chunk) pairs currently held.
    pub fn len(&self) -> usize {
        self.vectors.len()
    }

    pub fn is_empty(&self) -> bool {
        self.vectors.is_empty()
    }

    /// Whether the index holds data (created in-process or hydrated from
    /// disk). Searching an unloaded index yields no results, not an error.
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    /// Replace the index contents with `vectors` and their parallel `chunks`,
    /// then persist.
    ///
    /// Vectors are L2-normalized before storage.
    ///
    /// # Errors
    /// - `DimensionMismatch` if any vector's width differs from the
    ///   configured dimension.
    /// - `Validation` if `vectors` and `chunks` disagree in length.
    /// - `Io` if persisting the artifacts fails.
    pub fn create(&mut self, mut vectors: Vec<Vec<f32>>, chunks: Vec<Chunk>) -> Result<(), SageError> {
        self.check_batch(&vectors, &chunks)?;

        for vector in &mut vectors {
            normalize(vector);
        }

        self.vectors = vectors;
        self.chunks = chunks;
        self.loaded = true;
        self.persist()?;

        info!(
            document_id = %self.document_id,
            chunks = self.chunks.len(),
            dimension = self.dimension,
            "similarity index created"
        );
        Ok(())
    }

    /// Append `vectors`/`chunks` to the existing contents, preserving the
    /// parallel-array invariant, then persist. Behaves as
    /// [`create`](Self::create) when the index holds nothing yet.
    pub fn append(&mut self, mut vectors: Vec<Vec<f32>>, chunks: Vec<Chunk>) -> Result<(), SageError> {
        if !self.loaded && self.vectors.is_empty() {
            return self.create(vectors, chunks);
        }

        self.check_batch(&vectors, &chunks)?;
        for vector in &mut vectors {
            normalize(vector);
        }

        let added = chunks.len();
        self.vectors.extend(vectors);
        self.chunks.extend(chunks);
        self.persist()?;

        info!(
            document_id = %self.document_id,
            added,
            total = self.chunks.len(),
            "chunks appended to similarity index"
        );
        Ok(())
    }

    /// Scan every stored vector against `query` and return at most `k`
    /// results with `score >= score_threshold` (inclusive), best first.
    ///
    /// Scores are non-increasing across the returned sequence; ties keep
    /// original insertion order (the sort is stable). An unloaded index
    /// returns an empty vec — callers distinguish that from a true miss via
    /// [`is_loaded`](Self::is_loaded).
    ///
    /// # Errors
    /// `DimensionMismatch` if the query vector has the wrong width.
    pub fn search(
        &self,
        query: &[f32],
        k: usize,
        score_threshold: f32,
    ) -> Result<Vec<RetrievalResult>, SageError> {
        if !self.loaded || self.vectors.is_empty() {
            return Ok(Vec::new());
        }
        if query.len() != self.dimension {
            return Err(SageError::DimensionMismatch {
                expected: self.dimension,
                got: query.len(),
            });
        }

        let mut query = query.to_vec();
        normalize(&mut query);

        let mut scored: Vec<(usize, f32)> = self
            .vectors
            .iter()
            .enumerate()
            .map(|(position, vector)| (position, dot(&query, vector)))
            .filter(|(_, score)| *score >= score_threshold)
            .collect();

        // Stable sort: equal scores stay in insertion order, earlier chunk wins.
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(k);

        Ok(scored
            .into_iter()
            .enumerate()
            .map(|(rank, (position, score))| RetrievalResult {
                chunk: self.chunks[position].clone(),
                score,
                rank: rank + 1,
            })
            .collect())
    }

    /// Write both artifacts to the index directory.
    pub fn persist(&self) -> Result<(), SageError> {
        if let Some(dir) = self.vectors_path.parent() {
            fs::create_dir_all(dir).map_err(|source| SageError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let blob = VectorBlobRef {
            dimension: self.dimension,
            vectors: &self.vectors,
        };
        let vector_bytes = bincode::serde::encode_to_vec(&blob, bincode::config::standard())
            .map_err(|e| SageError::Corruption {
                document_id: self.document_id.clone(),
                detail: format!("vector encode failed: {e}"),
            })?;
        let chunk_bytes = bincode::serde::encode_to_vec(&self.chunks, bincode::config::standard())
            .map_err(|e| SageError::Corruption {
                document_id: self.document_id.clone(),
                detail: format!("chunk encode failed: {e}"),
            })?;

        write_file(&self.vectors_path, &vector_bytes)?;
        write_file(&self.chunks_path, &chunk_bytes)?;
        Ok(())
    }

    /// Hydrate the index from its on-disk artifacts.
    ///
    /// Returns `Ok(false)` when the artifacts do not exist — including when
    /// only one of the two files is present, which is treated as "index
    /// absent" rather than an error.
    ///
    /// # Errors
    /// `Corruption` when the decoded arrays disagree in length or vector
    /// width; `Io` on unreadable files.
    pub fn load(&mut self) -> Result<bool, SageError> {
        let have_vectors = self.vectors_path.exists();
        let have_chunks = self.chunks_path.exists();
        if !have_vectors || !have_chunks {
            if have_vectors != have_chunks {
                warn!(
                    document_id = %self.document_id,
                    "partial index artifacts on disk; treating index as absent"
                );
            }
            return Ok(false);
        }

        let vector_bytes = read_file(&self.vectors_path)?;
        let chunk_bytes = read_file(&self.chunks_path)?;

        let (blob, _): (VectorBlob, usize) =
            bincode::serde::decode_from_slice(&vector_bytes, bincode::config::standard()).map_err(
                |e| SageError::Corruption {
                    document_id: self.document_id.clone(),
                    detail: format!("vector decode failed: {e}"),
                },
            )?;
        let (chunks, _): (Vec<Chunk>, usize) =
            bincode::serde::decode_from_slice(&chunk_bytes, bincode::config::standard()).map_err(
                |e| SageError::Corruption {
                    document_id: self.document_id.clone(),
                    detail: format!("chunk decode failed: {e}"),
                },
            )?;

        if blob.vectors.len() != chunks.len() {
            return Err(SageError::Corruption {
                document_id: self.document_id.clone(),
                detail: format!(
                    "{} vectors but {} chunks on disk",
                    blob.vectors.len(),
                    chunks.len()
                ),
            });
        }
        if blob.dimension != self.dimension {
            return Err(SageError::Corruption {
                document_id: self.document_id.clone(),
                detail: format!(
                    "artifact dimension {} does not match configured {}",
                    blob.dimension, self.dimension
                ),
            });
        }
        if let Some(bad) = blob.vectors.iter().find(|v| v.len() != blob.dimension) {
            return Err(SageError::Corruption {
                document_id: self.document_id.clone(),
                detail: format!("vector of width {} in a {}-d index", bad.len(), blob.dimension),
            });
        }

        self.vectors = blob.vectors;
        self.chunks = chunks;
        self.loaded = true;

        info!(
            document_id = %self.document_id,
            chunks = self.chunks.len(),
            "similarity index loaded from disk"
        );
        Ok(true)
    }

    /// Remove both durable artifacts and clear the in-memory state.
    /// Idempotent: deleting an already-deleted index is not an error.
    pub fn delete(&mut self) -> Result<(), SageError> {
        for path in [&self.vectors_path, &self.chunks_path] {
            match fs::remove_file(path) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(source) => {
                    return Err(SageError::Io {
                        path: path.clone(),
                        source,
                    });
                }
            }
        }

        self.vectors.clear();
        self.chunks.clear();
        self.loaded = false;

        info!(document_id = %self.document_id, "similarity index deleted");
        Ok(())
    }

    pub fn stats(&self) -> IndexStats {
        IndexStats {
            document_id: self.document_id.clone(),
            loaded: self.loaded,
            total_chunks: self.chunks.len(),
            dimension: self.dimension,
        }
    }

    fn check_batch(&self, vectors: &[Vec<f32>], chunks: &[Chunk]) -> Result<(), SageError> {
        if vectors.len() != chunks.len() {
            return Err(SageError::Validation(format!(
                "{} vectors for {} chunks",
                vectors.len(),
                chunks.len()
            )));
        }
        if let Some(bad) = vectors.iter().find(|v| v.len() != self.dimension) {
            return Err(SageError::DimensionMismatch {
                expected: self.dimension,
                got: bad.len(),
            });
        }
        Ok(())
    }
}

/// Document ids become artifact file stems, so they must not be able to
/// escape the index directory.
fn validate_document_id(document_id: &str) -> Result<(), SageError> {
    let ok = !document_id.is_empty()
        && document_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_'));
    if ok {
        Ok(())
    } else {
        Err(SageError::Validation(format!(
            "malformed document id '{document_id}': expected [A-Za-z0-9_-]+"
        )))
    }
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

fn dot(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn write_file(path: &Path, bytes: &[u8]) -> Result<(), SageError> {
    fs::write(path, bytes).map_err(|source| SageError::Io {
        path: path.to_path_buf(),
        source,
    })
}

fn read_file(path: &Path) -> Result<Vec<u8>, SageError> {
    fs::read(path).map_err(|source| SageError::Io {
        path: path.to_path_buf(),
        source,
    })
}
