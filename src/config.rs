//! Application configuration.
//!
//! Defines the [`AppConfig`] struct holding every knob the retrieval
//! pipeline consumes — chunking geometry, retrieval defaults, prompt
//! budgets, and the generation endpoint — plus [`load_config`] to read it
//! from a YAML file. Values the file omits fall back to defaults tuned for
//! the bundled MiniLM embedder.
//!
//! # Examples
//!
//! ```no_run
//! use doc_sage::config::load_config;
//!
//! let config = load_config("/path/to/config.yaml").unwrap();
//! println!("{config:?}");
//! ```

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;

use crate::chunker::TextChunker;
use crate::embedding::DEFAULT_MODEL_ID;
use crate::error::SageError;

/// Everything the pipeline needs to run, loadable from YAML.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct AppConfig {
    /// Base URL of the OpenAI-compatible generation API.
    pub api_base: String,

    /// API key for the generation API.
    pub api_key: String,

    /// Generation model name.
    pub model: String,

    /// Sentence-embedding model identifier (Hugging Face Hub).
    #[serde(default = "default_embedding_model")]
    pub embedding_model: String,

    /// Expected embedding width; checked against the activated model.
    #[serde(default = "default_embedding_dimension")]
    pub embedding_dimension: usize,

    /// Chunk character budget.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Characters of a closed chunk that seed the next one. Must be
    /// smaller than `chunk_size`.
    #[serde(default = "default_chunk_overlap")]
    pub chunk_overlap: usize,

    /// Default number of chunks to retrieve per query.
    #[serde(default = "default_max_chunks")]
    pub max_chunks: usize,

    /// Default minimum similarity score for retrieval (inclusive).
    #[serde(default = "default_min_score")]
    pub min_score: f32,

    /// Character budget for the concatenated context sections of a prompt.
    #[serde(default = "default_context_char_budget")]
    pub context_char_budget: usize,

    /// Number of recent conversation turns included in the prompt.
    #[serde(default = "default_history_turns")]
    pub history_turns: usize,

    /// Character cap applied to each historical answer.
    #[serde(default = "default_history_answer_cap")]
    pub history_answer_cap: usize,

    /// Deadline in seconds for embedder and generator calls.
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,

    /// Where index artifacts live; defaults to `<config dir>/indexes`.
    #[serde(default)]
    pub index_dir: Option<PathBuf>,
}

fn default_embedding_model() -> String {
    DEFAULT_MODEL_ID.to_string()
}

fn default_embedding_dimension() -> usize {
    384
}

fn default_chunk_size() -> usize {
    1000
}

fn default_chunk_overlap() -> usize {
    200
}

fn default_max_chunks() -> usize {
    5
}

fn default_min_score() -> f32 {
    0.1
}

fn default_context_char_budget() -> usize {
    2500
}

fn default_history_turns() -> usize {
    2
}

fn default_history_answer_cap() -> usize {
    200
}

fn default_request_timeout_secs() -> u64 {
    60
}

impl AppConfig {
    /// Reject configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), SageError> {
        if self.chunk_size == 0 {
            return Err(SageError::Validation("chunk_size must be positive".into()));
        }
        if self.chunk_overlap >= self.chunk_size {
            return Err(SageError::Validation(format!(
                "chunk_overlap ({}) must be smaller than chunk_size ({})",
                self.chunk_overlap, self.chunk_size
            )));
        }
        if !(-1.0..=1.0).contains(&self.min_score) {
            return Err(SageError::Validation(format!(
                "min_score ({}) must lie in [-1, 1]",
                self.min_score
            )));
        }
        Ok(())
    }

    /// A chunker with this configuration's geometry.
    pub fn chunker(&self) -> TextChunker {
        TextChunker::new(self.chunk_size, self.chunk_overlap)
    }

    pub fn request_timeout(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.request_timeout_secs)
    }
}

/// Load and validate an [`AppConfig`] from a YAML file.
///
/// # Errors
/// `Io` when the file cannot be read, `Validation` when the YAML does not
/// parse or the values fail [`AppConfig::validate`].
pub fn load_config(file: &str) -> Result<AppConfig, SageError> {
    let content = fs::read_to_string(file).map_err(|source| SageError::Io {
        path: PathBuf::from(file),
        source,
    })?;
    let config: AppConfig = serde_yaml::from_str(&content)
        .map_err(|e| SageError::Validation(format!("config parse failed: {e}")))?;
    config.validate()?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn loads_a_minimal_config_with_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
api_base: "http://localhost:11434/v1"
api_key: "unused"
model: "qwen2.5:14b"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.api_base, "http://localhost:11434/v1");
        assert_eq!(config.model, "qwen2.5:14b");
        assert_eq!(config.embedding_model, DEFAULT_MODEL_ID);
        assert_eq!(config.embedding_dimension, 384);
        assert_eq!(config.chunk_size, 1000);
        assert_eq!(config.chunk_overlap, 200);
        assert_eq!(config.max_chunks, 5);
        assert!((config.min_score - 0.1).abs() < 1e-6);
        assert_eq!(config.context_char_budget, 2500);
        assert_eq!(config.history_turns, 2);
        assert!(config.index_dir.is_none());
    }

    #[test]
    fn explicit_values_override_defaults() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
api_base: "http://example.com/v1"
api_key: "key"
model: "m"
chunk_size: 800
chunk_overlap: 150
max_chunks: 3
min_score: 0.25
index_dir: "/tmp/sage-indexes"
"#
        )
        .unwrap();

        let config = load_config(temp_file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.chunk_size, 800);
        assert_eq!(config.chunk_overlap, 150);
        assert_eq!(config.max_chunks, 3);
        assert_eq!(config.index_dir, Some(PathBuf::from("/tmp/sage-indexes")));
    }

    #[test]
    fn missing_file_is_an_error() {
        assert!(load_config("non/existent/path").is_err());
    }

    #[test]
    fn malformed_yaml_is_an_error() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(temp_file, r#"invalid: config: format"#).unwrap();
        assert!(load_config(temp_file.path().to_str().unwrap()).is_err());
    }

    #[test]
    fn overlap_must_be_smaller_than_chunk_size() {
        let mut temp_file = NamedTempFile::new().unwrap();
        writeln!(
            temp_file,
            r#"
api_base: "http://example.com/v1"
api_key: "key"
model: "m"
chunk_size: 200
chunk_overlap: 200
"#
        )
        .unwrap();

        let err = load_config(temp_file.path().to_str().unwrap()).unwrap_err();
        assert!(matches!(err, SageError::Validation(_)));
    }
}
