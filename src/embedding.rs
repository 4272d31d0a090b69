//! # Embeddings
//!
//! The [`Embedder`] trait is the core's contract with the text→vector
//! collaborator: a batch `encode` plus a fixed `dimension` discovered once at
//! activation and stable for the process lifetime.
//!
//! [`CandleEmbedder`] is the bundled implementation: the
//! `all-MiniLM-L6-v2` sentence-transformer run with Candle (pure Rust ML
//! framework), weights fetched from the Hugging Face Hub on first activation.
//! It embeds text into 384-d vectors via BERT forward, attention-mask mean
//! pooling, and L2 normalization.
//!
//! The embedder has a two-phase lifecycle: construction is cheap and does no
//! I/O; [`activate`](CandleEmbedder::activate) loads the model and probes the
//! embedding dimension. Activation is idempotent and safe to call from
//! multiple call sites; "not yet activated" is an explicit state, and
//! encoding in that state is an error rather than a hidden lazy load.
//! Inference is CPU-bound and runs on the blocking pool.

use async_trait::async_trait;
use candle_core::{DType, Device, Tensor};
use candle_nn::VarBuilder;
use candle_transformers::models::bert::{BertModel, Config, DTYPE};
use hf_hub::{Repo, RepoType, api::sync::Api};
use std::sync::{Arc, RwLock};
use tokenizers::Tokenizer;
use tracing::info;

use crate::error::SageError;

/// Model identifier used when none is configured.
pub const DEFAULT_MODEL_ID: &str = "sentence-transformers/all-MiniLM-L6-v2";

/// Opaque text→vector collaborator. Every vector a single instance produces
/// has the same width, equal to `dimension()`.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Fixed embedding width.
    ///
    /// # Errors
    /// `Embedding` if the implementation has not been activated yet.
    fn dimension(&self) -> Result<usize, SageError>;

    /// Encode a batch of texts into one vector each, preserving order.
    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SageError>;
}

enum ActivationState {
    Idle,
    Ready(Arc<LoadedModel>),
}

/// Sentence-embedding model backed by Candle.
pub struct CandleEmbedder {
    model_id: String,
    state: RwLock<ActivationState>,
}

impl CandleEmbedder {
    /// Cheap construction; no I/O happens until [`activate`](Self::activate).
    pub fn new(model_id: impl Into<String>) -> Self {
        Self {
            model_id: model_id.into(),
            state: RwLock::new(ActivationState::Idle),
        }
    }

    /// Load weights and tokenizer from the Hugging Face Hub (or its local
    /// cache) and probe the embedding dimension. Idempotent: once activated,
    /// further calls return immediately.
    pub async fn activate(&self) -> Result<(), SageError> {
        if matches!(*self.read_state()?, ActivationState::Ready(_)) {
            return Ok(());
        }

        let model_id = self.model_id.clone();
        let loaded = tokio::task::spawn_blocking(move || LoadedModel::load(&model_id))
            .await
            .map_err(|e| SageError::Embedding(format!("model load task failed: {e}")))??;

        info!(
            model_id = %self.model_id,
            dimension = loaded.dimension,
            "embedding model activated"
        );

        let mut state = self
            .state
            .write()
            .map_err(|_| SageError::Embedding("embedder state poisoned".into()))?;
        // A concurrent activation may have won; keep the model already there.
        if matches!(*state, ActivationState::Idle) {
            *state = ActivationState::Ready(Arc::new(loaded));
        }
        Ok(())
    }

    fn read_state(&self) -> Result<std::sync::RwLockReadGuard<'_, ActivationState>, SageError> {
        self.state
            .read()
            .map_err(|_| SageError::Embedding("embedder state poisoned".into()))
    }

    fn ready_model(&self) -> Result<Arc<LoadedModel>, SageError> {
        match &*self.read_state()? {
            ActivationState::Ready(model) => Ok(Arc::clone(model)),
            ActivationState::Idle => Err(SageError::Embedding(
                "embedding model not activated; call activate() first".into(),
            )),
        }
    }
}

#[async_trait]
impl Embedder for CandleEmbedder {
    fn dimension(&self) -> Result<usize, SageError> {
        Ok(self.ready_model()?.dimension)
    }

    async fn encode(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, SageError> {
        let model = self.ready_model()?;
        let texts = texts.to_vec();

        tokio::task::spawn_blocking(move || {
            texts.iter().map(|text| model.embed(text)).collect()
        })
        .await
        .map_err(|e| SageError::Embedding(format!("encode task failed: {e}")))?
    }
}

/// The activated model: BERT weights, tokenizer, device, and the probed
/// embedding width.
struct LoadedModel {
    model: BertModel,
    tokenizer: Tokenizer,
    device: Device,
    dimension: usize,
}

impl LoadedModel {
    fn load(model_id: &str) -> Result<Self, SageError> {
        let device = Device::Cpu;
        let repo = Repo::with_revision(model_id.to_string(), RepoType::Model, "main".to_string());
        let api = Api::new().map_err(embed_err)?.repo(repo);

        let config_file = api.get("config.json").map_err(embed_err)?;
        let tokenizer_file = api.get("tokenizer.json").map_err(embed_err)?;
        let weights_file = api.get("model.safetensors").map_err(embed_err)?;

        let config = std::fs::read_to_string(config_file).map_err(embed_err)?;
        let config: Config = serde_json::from_str(&config).map_err(embed_err)?;

        let tokenizer = Tokenizer::from_file(tokenizer_file)
            .map_err(|e| SageError::Embedding(format!("tokenizer load failed: {e}")))?;

        let vb = unsafe {
            VarBuilder::from_mmaped_safetensors(&[weights_file], DTYPE, &device).map_err(embed_err)?
        };
        let model = BertModel::load(vb, &config).map_err(embed_err)?;

        let mut loaded = Self {
            model,
            tokenizer,
            device,
            dimension: 0,
        };
        // Dimension discovery, once: embed a probe and measure the output.
        loaded.dimension = loaded.embed("dimension probe")?.len();
        Ok(loaded)
    }

    /// Tokenize (auto-truncated at the model's max length), forward, mean
    /// pool over the attention mask, L2 normalize.
    fn embed(&self, text: &str) -> Result<Vec<f32>, SageError> {
        let tokens = self
            .tokenizer
            .encode(text, true)
            .map_err(|e| SageError::Embedding(format!("tokenization failed: {e}")))?;

        let token_ids = Tensor::new(tokens.get_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(embed_err)?;
        let token_type_ids = Tensor::new(tokens.get_type_ids(), &self.device)
            .and_then(|t| t.unsqueeze(0))
            .map_err(embed_err)?;

        let hidden = self
            .model
            .forward(&token_ids, &token_type_ids, None)
            .map_err(embed_err)?;

        let pooled = mean_pool(&hidden, tokens.get_attention_mask(), &self.device)?;
        let normalized = l2_normalize(&pooled)?;
        normalized.to_vec1::<f32>().map_err(embed_err)
    }
}

/// Mean over the sequence dimension, weighted by the attention mask so
/// padding tokens contribute nothing.
fn mean_pool(hidden: &Tensor, attention_mask: &[u32], device: &Device) -> Result<Tensor, SageError> {
    // hidden: [1, seq_len, width]; mask must broadcast as [1, seq_len, 1].
    let mask = Tensor::new(attention_mask, device)
        .and_then(|t| t.to_dtype(DType::F32))
        .and_then(|t| t.unsqueeze(0))
        .and_then(|t| t.unsqueeze(2))
        .map_err(embed_err)?;

    let summed = hidden
        .broadcast_mul(&mask)
        .and_then(|t| t.sum(1))
        .map_err(embed_err)?;
    let counts = mask
        .sum(1)
        .and_then(|t| t.clamp(1f32, f32::INFINITY))
        .map_err(embed_err)?;

    summed
        .broadcast_div(&counts)
        .and_then(|t| t.squeeze(0))
        .map_err(embed_err)
}

fn l2_normalize(tensor: &Tensor) -> Result<Tensor, SageError> {
    let norm = tensor
        .sqr()
        .and_then(|t| t.sum_all())
        .and_then(|t| t.sqrt())
        .map_err(embed_err)?;
    tensor.broadcast_div(&norm).map_err(embed_err)
}

fn embed_err(e: impl std::fmt::Display) -> SageError {
    SageError::Embedding(e.to_string())
}
