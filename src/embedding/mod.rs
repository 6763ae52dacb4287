//! Text-to-vector embedding pipeline.
//!
//! Provides the [`EmbeddingProvider`] trait, a deterministic feature-hashing
//! provider that needs no model files, and a local ONNX provider using
//! all-MiniLM-L6-v2. Providers are built by [`create_provider`] from config.

pub mod hashing;
pub mod local;

use std::sync::Arc;

use anyhow::Result;

/// Fixed probe used by [`EmbeddingProvider::health`].
pub const HEALTH_PROBE: &str = "cairn embedding health probe";

/// Trait for embedding text into vectors.
///
/// Implementations are deterministic and produce L2-normalized vectors of
/// exactly [`dimensions`](EmbeddingProvider::dimensions) components. All
/// methods are synchronous; async callers go through `spawn_blocking`.
pub trait EmbeddingProvider: Send + Sync {
    /// Embed a single text string into a vector.
    fn embed(&self, text: &str) -> Result<Vec<f32>>;

    /// Embed a batch of text strings. Implementations may override for batched inference.
    fn embed_batch(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.embed(t)).collect()
    }

    fn dimensions(&self) -> usize;

    /// Short identifier recorded in `schema_meta`.
    fn name(&self) -> &str;

    /// Round-trip the fixed probe and check the dimensionality.
    fn health(&self) -> bool {
        match self.embed(HEALTH_PROBE) {
            Ok(v) => v.len() == self.dimensions(),
            Err(e) => {
                tracing::warn!(provider = self.name(), error = %e, "embedding health probe failed");
                false
            }
        }
    }
}

/// Create an embedding provider from config.
///
/// `"hashing"` needs nothing on disk. `"local"` needs the ONNX model and
/// tokenizer; run `cairn model download` first.
pub fn create_provider(config: &crate::config::EmbeddingConfig) -> Result<Arc<dyn EmbeddingProvider>> {
    match config.provider.as_str() {
        "hashing" => Ok(Arc::new(hashing::HashingEmbeddingProvider::new(config.dimension))),
        "local" => {
            let provider = local::LocalEmbeddingProvider::new(config)?;
            anyhow::ensure!(
                provider.dimensions() == config.dimension,
                "embedding.dimension is {} but the local model produces {} dimensions",
                config.dimension,
                provider.dimensions()
            );
            Ok(Arc::new(provider))
        }
        other => anyhow::bail!("unknown embedding provider: {other}. Supported: hashing, local"),
    }
}

/// L2-normalize a vector. Returns the input unchanged if its norm is zero.
pub(crate) fn l2_normalize(v: &[f32]) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        v.iter().map(|x| x / norm).collect()
    } else {
        v.to_vec()
    }
}
