//! Text embedding models.
//!
//! The index and the query path only see the [`Embedder`] trait. The default
//! implementation runs a sentence-transformers model locally with candle.

use crate::error::{RagEvalError, Result};

/// Encodes text into fixed-dimension vectors.
///
/// The same model and pooling configuration must be used when the index is
/// built and when it is queried. [`Embedder::model_id`] is persisted with the
/// index so callers can detect a change.
pub trait Embedder {
    /// Identifier of the underlying model, e.g. a Hugging Face repo id.
    fn model_id(&self) -> &str;

    /// Length of every vector this model produces.
    fn dimension(&self) -> usize;

    /// Encode a batch of texts, one vector per input, in input order.
    fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    /// Encode a single text.
    fn encode_one(&self, text: &str) -> Result<Vec<f32>> {
        self.encode(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| RagEvalError::Embedding("model returned no vector".to_string()))
    }
}

#[cfg(feature = "local-embeddings")]
pub use local::MiniLmEmbedder;

#[cfg(feature = "local-embeddings")]
mod local {
    use super::Embedder;
    use crate::error::{RagEvalError, Result};
    use anyhow::Context;
    use candle_core::{Device, Tensor};
    use candle_nn::VarBuilder;
    use candle_transformers::models::bert::{BertModel, Config as BertConfig, DTYPE};
    use hf_hub::{Repo, RepoType, api::sync::Api};
    use tokenizers::Tokenizer;
    use tracing::info;

    /// Sentence-transformers model with mean pooling and L2 normalisation.
    pub struct MiniLmEmbedder {
        model_id: String,
        model: BertModel,
        tokenizer: Tokenizer,
        device: Device,
        dimension: usize,
        normalize: bool,
    }

    impl MiniLmEmbedder {
        /// Load the all-MiniLM-L6-v2 model from Hugging Face Hub.
        pub fn load_minilm() -> Result<Self> {
            Self::load("sentence-transformers/all-MiniLM-L6-v2")
        }

        /// Load a sentence-transformers model by name.
        pub fn load(model_id: &str) -> Result<Self> {
            Self::load_inner(model_id).map_err(|e| RagEvalError::Embedding(format!("{:#}", e)))
        }

        fn load_inner(model_id: &str) -> anyhow::Result<Self> {
            let device = Device::Cpu; // Use CPU for portability

            let api = Api::new().context("Failed to create HF Hub API")?;
            let repo = api.repo(Repo::new(model_id.to_string(), RepoType::Model));

            let config_path = repo
                .get("config.json")
                .context("Failed to get config.json")?;
            let tokenizer_path = repo
                .get("tokenizer.json")
                .context("Failed to get tokenizer.json")?;
            let weights_path = repo
                .get("model.safetensors")
                .or_else(|_| repo.get("pytorch_model.bin"))
                .context("Failed to get model weights")?;

            let config_text = std::fs::read_to_string(&config_path)?;
            let config: BertConfig =
                serde_json::from_str(&config_text).context("Failed to parse config")?;
            let dimension = serde_json::from_str::<serde_json::Value>(&config_text)?
                .get("hidden_size")
                .and_then(|v| v.as_u64())
                .context("config.json has no hidden_size")? as usize;

            let tokenizer = Tokenizer::from_file(&tokenizer_path)
                .map_err(|e| anyhow::anyhow!("Failed to load tokenizer: {}", e))?;

            let vb = unsafe {
                VarBuilder::from_mmaped_safetensors(&[weights_path], DTYPE, &device)
                    .context("Failed to load model weights")?
            };

            let model = BertModel::load(vb, &config).context("Failed to load BERT model")?;

            info!(model = model_id, dimension, "Loaded embedding model");

            Ok(Self {
                model_id: model_id.to_string(),
                model,
                tokenizer,
                device,
                dimension,
                normalize: true,
            })
        }

        fn encode_inner(&self, texts: &[&str]) -> anyhow::Result<Vec<Vec<f32>>> {
            let encodings = self
                .tokenizer
                .encode_batch(texts.to_vec(), true)
                .map_err(|e| anyhow::anyhow!("Tokenization failed: {}", e))?;

            let max_len = encodings
                .iter()
                .map(|e| e.get_ids().len())
                .max()
                .unwrap_or(0);

            let mut input_ids_vec = Vec::with_capacity(texts.len() * max_len);
            let mut attention_mask_vec = Vec::with_capacity(texts.len() * max_len);

            for encoding in &encodings {
                let mut ids = encoding.get_ids().to_vec();
                let mut mask = encoding.get_attention_mask().to_vec();
                ids.resize(max_len, 0);
                mask.resize(max_len, 0);
                input_ids_vec.extend(ids);
                attention_mask_vec.extend(mask);
            }

            let batch_size = texts.len();
            let input_ids = Tensor::from_vec(input_ids_vec, (batch_size, max_len), &self.device)?;
            let attention_mask =
                Tensor::from_vec(attention_mask_vec, (batch_size, max_len), &self.device)?;
            let token_type_ids = input_ids.zeros_like()?;

            let output = self
                .model
                .forward(&input_ids, &token_type_ids, Some(&attention_mask))?;

            // Mean pooling over the sequence, ignoring padding.
            let mask = attention_mask
                .unsqueeze(2)?
                .to_dtype(output.dtype())?
                .broadcast_as(output.shape())?;
            let summed = (output * &mask)?.sum(1)?;
            let counts = mask.sum(1)?.clamp(1e-9, f64::MAX)?;
            let pooled = (summed / counts)?;

            let pooled = if self.normalize {
                let norms = pooled.sqr()?.sum_keepdim(1)?.sqrt()?;
                let shape = pooled.shape().clone();
                (pooled / norms.broadcast_as(&shape)?)?
            } else {
                pooled
            };

            Ok(pooled.to_vec2::<f32>()?)
        }
    }

    impl Embedder for MiniLmEmbedder {
        fn model_id(&self) -> &str {
            &self.model_id
        }

        fn dimension(&self) -> usize {
            self.dimension
        }

        fn encode(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
            if texts.is_empty() {
                return Ok(Vec::new());
            }
            self.encode_inner(texts)
                .map_err(|e| RagEvalError::Embedding(format!("{:#}", e)))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::KeywordEmbedder;

    #[test]
    fn test_encode_one_uses_batch_path() {
        let embedder = KeywordEmbedder::new(&["billing", "password"]);
        let v = embedder.encode_one("reset password").unwrap();
        assert_eq!(v.len(), embedder.dimension());
        assert_eq!(v, embedder.encode(&["reset password"]).unwrap()[0]);
    }
}
