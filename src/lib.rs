//! # doc_sage (library root)
//!
//! Document-grounded question answering: index a document once, then ask
//! natural-language questions and get answers grounded in its content.
//!
//! The pipeline, end to end:
//! - [`chunker`] splits document text into bounded, overlapping segments.
//! - [`embedding`] turns text into fixed-width vectors (bundled Candle
//!   implementation of `all-MiniLM-L6-v2`, or any [`embedding::Embedder`]).
//! - [`vector_index`] stores (vector, chunk) pairs per document and serves
//!   cosine-similarity search; [`registry`] caches one index per document
//!   and owns lazy loading and deletion.
//! - [`indexer`] drives the write path (chunk → embed → append → persist)
//!   and the raw search path.
//! - [`retriever`] packages a query's hits into an ordered context set, or
//!   a typed miss.
//! - [`qa`] assembles the budgeted prompt (contexts + bounded conversation
//!   history + question) and calls the generation backend, degrading
//!   gracefully when it fails.
//!
//! Configuration ([`config`]) and the error taxonomy ([`error`]) round out
//! the crate. The `sage` binary wires these together into a small CLI.
//!
//! ## Quick example
//! ```no_run
//! use doc_sage::chunker::TextChunker;
//!
//! let chunks = TextChunker::new(1000, 200).chunk("Some document text.", "notes.txt");
//! assert_eq!(chunks.len(), 1);
//! ```

use directories::ProjectDirs;

pub mod chunker;
pub mod config;
pub mod embedding;
pub mod error;
pub mod indexer;
pub mod qa;
pub mod registry;
pub mod retriever;
pub mod vector_index;

use crate::error::SageError;

/// Return the per-platform configuration directory used by doc_sage
/// (e.g. `~/.config/sage` on Linux).
///
/// The directory is **not** created by this function; callers that need it
/// should create it with `fs::create_dir_all`.
///
/// # Errors
/// Returns an error if the platform configuration directory cannot be
/// determined.
pub fn config_dir() -> Result<std::path::PathBuf, SageError> {
    let proj_dirs = ProjectDirs::from("com", "doc-sage", "sage")
        .ok_or_else(|| SageError::Validation("unable to determine config directory".into()))?;
    Ok(proj_dirs.config_dir().to_path_buf())
}
