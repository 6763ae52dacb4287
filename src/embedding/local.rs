//! ONNX Runtime embedder for all-MiniLM-L6-v2.
//!
//! Tokenize, run the model, mean-pool token embeddings under the attention
//! mask, L2-normalize. Model and tokenizer are read from `embedding.cache_dir`.

use std::path::Path;
use std::sync::Mutex;

use anyhow::{Context, Result};
use ort::session::Session;
use ort::value::Tensor;
use tokenizers::Tokenizer;

use super::{l2_normalize, EmbeddingProvider};
use crate::config::EmbeddingConfig;

/// Output width of all-MiniLM-L6-v2.
pub const LOCAL_DIM: usize = 384;

/// The model was trained with sequences of at most 256 tokens.
const MAX_SEQ_LEN: usize = 256;

pub const MODEL_FILE: &str = "model.onnx";
pub const TOKENIZER_FILE: &str = "tokenizer.json";

pub struct LocalEmbeddingProvider {
    session: Mutex<Session>,
    tokenizer: Tokenizer,
}

// Safety: the session is only reached through the Mutex; Tokenizer is Send + Sync.
unsafe impl Send for LocalEmbeddingProvider {}
unsafe impl Sync for LocalEmbeddingProvider {}

/// Are both model files present in `cache_dir`?
pub fn model_files_present(cache_dir: &Path) -> bool {
    cache_dir.join(MODEL_FILE).exists() && cache_dir.join(TOKENIZER_FILE).exists()
}

impl LocalEmbeddingProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let cache_dir = crate::config::expand_tilde(&config.cache_dir);
        let model_path = cache_dir.join(MODEL_FILE);
        let tokenizer_path = cache_dir.join(TOKENIZER_FILE);

        anyhow::ensure!(
            model_files_present(&cache_dir),
            "ONNX model or tokenizer missing under {}. Run `cairn model download` first.",
            cache_dir.display()
        );

        let session = Session::builder()?
            .with_optimization_level(ort::session::builder::GraphOptimizationLevel::Level3)?
            .with_intra_threads(4)?
            .commit_from_file(&model_path)
            .context("failed to load ONNX model")?;

        let mut tokenizer = Tokenizer::from_file(&tokenizer_path)
            .map_err(|e| anyhow::anyhow!("failed to load tokenizer: {e}"))?;
        tokenizer
            .with_truncation(Some(tokenizers::TruncationParams {
                max_length: MAX_SEQ_LEN,
                ..Default::default()
            }))
            .map_err(|e| anyhow::anyhow!("failed to set truncation: {e}"))?;
        tokenizer.with_padding(Some(tokenizers::PaddingParams {
            strategy: tokenizers::PaddingStrategy::BatchLongest,
            ..Default::default()
        }));

        tracing::info!(model = %model_path.display(), name = %config.model, "local embedding model loaded");

        Ok(Self {
            session: Mutex::new(session),
            tokenizer,
        })
    }
}

impl EmbeddingProvider for LocalEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_batch(&[text])?
            .into_iter()
            .next()
            .ok_or_else(|| anyhow::anyhow!("model returned no embedding"))
    }

    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let encodings = self
            .tokenizer
            .encode_batch(texts.to_vec(), true)
            .map_err(|e| anyhow::anyhow!("tokenization failed: {e}"))?;

        let batch = encodings.len();
        let seq_len = encodings[0].get_ids().len();

        let mut ids = Vec::with_capacity(batch * seq_len);
        let mut mask = Vec::with_capacity(batch * seq_len);
        for encoding in &encodings {
            ids.extend(encoding.get_ids().iter().map(|&id| id as i64));
            mask.extend(encoding.get_attention_mask().iter().map(|&m| m as i64));
        }

        let shape = vec![batch as i64, seq_len as i64];
        let ids_tensor = Tensor::from_array((shape.clone(), ids.into_boxed_slice()))?;
        let mask_tensor = Tensor::from_array((shape.clone(), mask.clone().into_boxed_slice()))?;
        let type_ids_tensor = Tensor::from_array((shape, vec![0i64; batch * seq_len].into_boxed_slice()))?;

        let mut session = self
            .session
            .lock()
            .map_err(|e| anyhow::anyhow!("session lock poisoned: {e}"))?;
        let outputs = session.run(ort::inputs! {
            "input_ids" => ids_tensor,
            "attention_mask" => mask_tensor,
            "token_type_ids" => type_ids_tensor,
        })?;

        // Output naming differs between exports.
        let hidden = outputs
            .get("token_embeddings")
            .or_else(|| outputs.get("last_hidden_state"))
            .unwrap_or_else(|| &outputs[0]);
        let (dims, data) = hidden
            .try_extract_tensor::<f32>()
            .context("failed to extract token embeddings")?;

        let dims: &[i64] = &dims;
        anyhow::ensure!(
            dims.len() == 3 && dims[2] == LOCAL_DIM as i64,
            "unexpected token embedding shape {dims:?}, expected [batch, seq, {LOCAL_DIM}]"
        );
        let width = dims[2] as usize;
        let out_seq = dims[1] as usize;

        Ok((0..batch)
            .map(|b| mean_pool(&data[b * out_seq * width..(b + 1) * out_seq * width], &mask[b * seq_len..], width))
            .map(|pooled| l2_normalize(&pooled))
            .collect())
    }

    fn dimensions(&self) -> usize {
        LOCAL_DIM
    }

    fn name(&self) -> &str {
        "local"
    }
}

/// Average the token rows of `tokens` (`seq × width`) whose mask is set.
fn mean_pool(tokens: &[f32], mask: &[i64], width: usize) -> Vec<f32> {
    let mut sum = vec![0.0f32; width];
    let mut count = 0.0f32;
    for (row, &m) in tokens.chunks_exact(width).zip(mask) {
        if m > 0 {
            for (acc, x) in sum.iter_mut().zip(row) {
                *acc += x;
            }
            count += 1.0;
        }
    }
    if count > 0.0 {
        sum.iter_mut().for_each(|x| *x /= count);
    }
    sum
}
