//! Deterministic feature-hashing embedder.
//!
//! Every lower-cased alphanumeric token and every character trigram of each
//! token is hashed with 64-bit FNV-1a into one of `dimension` buckets, with a
//! sign taken from a high hash bit. Whole tokens weigh more than trigrams.
//! The sum is L2-normalized. Output depends only on the input text and the
//! dimension, so it is stable across calls, processes, and platforms.

use anyhow::Result;

use super::{l2_normalize, EmbeddingProvider};

const FNV_OFFSET: u64 = 0xcbf2_9ce4_8422_2325;
const FNV_PRIME: u64 = 0x0000_0100_0000_01b3;

const TOKEN_WEIGHT: f32 = 1.0;
const TRIGRAM_WEIGHT: f32 = 0.5;

pub struct HashingEmbeddingProvider {
    dimension: usize,
}

impl HashingEmbeddingProvider {
    pub fn new(dimension: usize) -> Self {
        Self {
            dimension: dimension.max(1),
        }
    }

    fn add_feature(&self, acc: &mut [f32], feature: &[u8], weight: f32) {
        let h = fnv1a(feature);
        let bucket = (h % self.dimension as u64) as usize;
        let sign = if h >> 63 == 0 { 1.0 } else { -1.0 };
        acc[bucket] += sign * weight;
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    bytes.iter().fold(FNV_OFFSET, |h, b| (h ^ *b as u64).wrapping_mul(FNV_PRIME))
}

impl EmbeddingProvider for HashingEmbeddingProvider {
    fn embed(&self, text: &str) -> Result<Vec<f32>> {
        let mut acc = vec![0.0f32; self.dimension];
        let lowered = text.to_lowercase();

        for token in lowered.split(|c: char| !c.is_alphanumeric()).filter(|t| !t.is_empty()) {
            self.add_feature(&mut acc, token.as_bytes(), TOKEN_WEIGHT);

            let chars: Vec<char> = format!("^{token}$").chars().collect();
            for gram in chars.windows(3) {
                let gram: String = gram.iter().collect();
                self.add_feature(&mut acc, gram.as_bytes(), TRIGRAM_WEIGHT);
            }
        }

        Ok(l2_normalize(&acc))
    }

    fn dimensions(&self) -> usize {
        self.dimension
    }

    fn name(&self) -> &str {
        "hashing"
    }
}
