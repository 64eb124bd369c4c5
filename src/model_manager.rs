use candle_core::Device;
use pylate_rs::ColBERT;

use crate::{
    embedding::{Embedder, l2_normalize},
    error::{Error, Result},
};

pub const DEFAULT_MODEL_ID: &str = "lightonai/GTE-ModernColBERT-v1";
pub const MODEL_ENV_VAR: &str = "CVSCREEN_MODEL";

/// Select the best available compute device.
///
/// Uses CUDA when compiled with the `cuda` feature, Metal when compiled with
/// the `metal` feature, and falls back to CPU otherwise.
fn default_device() -> Device {
    #[cfg(feature = "cuda")]
    {
        if let Ok(device) = Device::new_cuda(0) {
            return device;
        }
    }

    #[cfg(feature = "metal")]
    {
        if let Ok(device) = Device::new_metal(0) {
            return device;
        }
    }

    Device::Cpu
}

/// Lazily loaded ColBERT encoder producing one pooled vector per text.
///
/// ColBERT emits a vector per token; fragments and job descriptions are
/// both encoded in document mode and mean-pooled over their non-padding
/// tokens, then L2-normalised, so identical texts map to identical vectors.
pub struct ModelManager {
    model: Option<ColBERT>,
    model_id: String,
}

impl Default for ModelManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ModelManager {
    /// Creates a new `ModelManager`. The model ID is resolved from:
    /// 1. The `CVSCREEN_MODEL` environment variable, if set
    /// 2. Otherwise, the default model (`lightonai/GTE-ModernColBERT-v1`)
    ///
    /// The model is not loaded until the first embedding call.
    pub fn new() -> Self {
        let model_id = std::env::var(MODEL_ENV_VAR)
            .unwrap_or_else(|_| DEFAULT_MODEL_ID.to_string());

        Self {
            model: None,
            model_id,
        }
    }

    /// Creates a `ModelManager` with an explicit model ID, bypassing
    /// environment variable resolution.
    pub fn with_model_id(model_id: String) -> Self {
        Self {
            model: None,
            model_id,
        }
    }

    /// Returns the model ID that will be (or has been) loaded.
    pub fn model_id(&self) -> &str {
        &self.model_id
    }

    /// Returns `true` if the model has already been loaded into memory.
    pub fn is_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Ensures the model is loaded, downloading from HuggingFace Hub if needed.
    fn ensure_loaded(&mut self) -> Result<&mut ColBERT> {
        let model = match self.model.take() {
            Some(model) => model,
            None => {
                tracing::info!(model = %self.model_id, "loading embedding model");
                let colbert: ColBERT = ColBERT::from(&self.model_id)
                    .with_device(default_device())
                    .try_into()
                    .map_err(|e| {
                        Error::Model(format!(
                            "failed to load {}: {e}",
                            self.model_id
                        ))
                    })?;
                colbert
            }
        };
        Ok(self.model.insert(model))
    }

    /// Encodes texts into pooled, normalised vectors.
    ///
    /// Texts are encoded one per forward pass: padding a mixed-length batch
    /// changes the token rows ColBERT emits, and a fragment's vector must
    /// not depend on its batch neighbours.
    pub fn encode_pooled(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        let model = self.ensure_loaded()?;

        let mut pooled = Vec::with_capacity(texts.len());
        for text in texts {
            let embeddings = model
                .encode(std::slice::from_ref(text), false)
                .map_err(|e| Error::Model(format!("encoding failed: {e}")))?;

            // embeddings shape: [1, num_tokens, dimension]
            let batch = embeddings.to_vec3::<f32>()?;
            let tokens = batch.first().ok_or_else(|| {
                Error::Embedding("model returned an empty batch".to_string())
            })?;
            pooled.push(mean_pool(tokens));
        }
        Ok(pooled)
    }
}

impl Embedder for ModelManager {
    fn name(&self) -> &str {
        &self.model_id
    }

    fn embed_batch(&mut self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.encode_pooled(texts)
    }
}

/// Average the token vectors that are not all-zero padding, then normalise.
fn mean_pool(tokens: &[Vec<f32>]) -> Vec<f32> {
    let dimension = tokens.first().map_or(0, Vec::len);
    let mut pooled = vec![0.0f32; dimension];
    let mut used = 0usize;

    for token in tokens.iter().filter(|t| t.iter().any(|x| *x != 0.0)) {
        for (acc, x) in pooled.iter_mut().zip(token) {
            *acc += x;
        }
        used += 1;
    }

    if used > 0 {
        pooled.iter_mut().for_each(|x| *x /= used as f32);
    }
    l2_normalize(&mut pooled);
    pooled
}
