//! Hashing Text Encoder
//!
//! Deterministic feature-hashing encoder: the general-purpose execution
//! path that needs no model weights, no downloads, and no accelerator.
//! Tokens and their character trigrams are hashed into a fixed-dimension
//! signed feature space, then L2-normalized.
//!
//! Identical input always produces the identical vector, across processes
//! and restarts, which is what lets category embeddings persisted at load
//! time be compared against query embeddings computed much later.

use super::{Result, TextEncoder};
use crate::content::tokenize;
use crate::embedding::{TEXT_DIMENSIONS, l2_normalize};

/// Weight of character-trigram features relative to whole-token features.
/// Trigrams let inflected forms ("credit"/"credits") share mass.
const TRIGRAM_WEIGHT: f32 = 0.5;

/// FNV-1a, 64-bit. Stable across platforms and processes, unlike the
/// standard library's SipHash with its unspecified keying.
#[inline]
fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x100000001b3);
    }
    hash
}

/// Deterministic feature-hashing text encoder
#[derive(Debug, Clone)]
pub struct HashingTextEncoder {
    dimensions: usize,
}

impl HashingTextEncoder {
    /// Encoder with a custom output dimensionality
    pub fn with_dimensions(dimensions: usize) -> Self {
        Self { dimensions }
    }

    #[inline]
    fn accumulate(&self, vector: &mut [f32], feature: &[u8], weight: f32) {
        let hash = fnv1a(feature);
        let index = (hash % self.dimensions as u64) as usize;
        // One spare hash bit picks the sign, the standard hashing trick
        // that keeps collisions from only ever adding mass.
        let sign = if hash & (1 << 63) == 0 { 1.0 } else { -1.0 };
        vector[index] += sign * weight;
    }
}

impl Default for HashingTextEncoder {
    fn default() -> Self {
        Self::with_dimensions(TEXT_DIMENSIONS)
    }
}

impl TextEncoder for HashingTextEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let tokens = tokenize(text);
        let mut vector = vec![0.0f32; self.dimensions];

        if tokens.is_empty() {
            // Content with no usable tokens (punctuation soup) still gets a
            // defined vector rather than an error; it will match nothing.
            return Ok(vector);
        }

        for token in &tokens {
            let bytes = token.as_bytes();
            self.accumulate(&mut vector, bytes, 1.0);

            if bytes.len() > 3 {
                for trigram in bytes.windows(3) {
                    self.accumulate(&mut vector, trigram, TRIGRAM_WEIGHT);
                }
            }
        }

        l2_normalize(&mut vector);
        Ok(vector)
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.encode(t)).collect()
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }

    fn name(&self) -> &'static str {
        "hashing-text"
    }
}
