//! Fusion Layer
//!
//! Combines the text-channel and image-channel vectors into a single
//! unit-normalized embedding of [`EMBEDDING_DIMENSIONS`]: normalize each
//! channel, concatenate, apply a fixed projection, re-normalize.
//!
//! The projection matrix is a seeded random projection rather than trained
//! weights (model training is out of scope); the seed is part of
//! [`FusionConfig`] so deployed weights stay stable across restarts.
//! Category embeddings persisted at load time and query embeddings
//! computed later must go through the same layer with the same seed.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use crate::embedding::{
    EMBEDDING_DIMENSIONS, Embedding, IMAGE_DIMENSIONS, TEXT_DIMENSIONS, l2_normalize,
};
use crate::encode::ChannelVector;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Fusion error type
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum FusionError {
    /// A channel vector does not match the configured dimensionality
    #[error("channel dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Default projection seed. Changing it invalidates every persisted
/// category embedding.
pub const DEFAULT_FUSION_SEED: u64 = 0x00c0_ffee;

/// Fusion layer configuration
#[derive(Debug, Clone)]
pub struct FusionConfig {
    /// Text channel dimensionality
    pub text_dimensions: usize,
    /// Image channel dimensionality
    pub image_dimensions: usize,
    /// Output embedding dimensionality
    pub output_dimensions: usize,
    /// Seed for the projection weights
    pub seed: u64,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            text_dimensions: TEXT_DIMENSIONS,
            image_dimensions: IMAGE_DIMENSIONS,
            output_dimensions: EMBEDDING_DIMENSIONS,
            seed: DEFAULT_FUSION_SEED,
        }
    }
}

// ============================================================================
// TYPES
// ============================================================================

/// A modality that contributed to a fused embedding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Modality {
    /// Text channel contributed
    Text,
    /// Image channel contributed
    Image,
}

/// The fused content embedding with its modality provenance
#[derive(Debug, Clone)]
pub struct FusedEmbedding {
    /// Unit-normalized embedding (all-zero when no modality was present)
    pub embedding: Embedding,
    /// Which modalities contributed. Empty means empty content; the
    /// matcher treats that as a well-defined no-match query.
    pub used_modalities: Vec<Modality>,
}

impl FusedEmbedding {
    /// True when no modality contributed (empty content)
    pub fn is_empty_content(&self) -> bool {
        self.used_modalities.is_empty()
    }
}

// ============================================================================
// FUSION LAYER
// ============================================================================

/// Fixed-projection fusion of per-modality channel vectors
pub struct FusionLayer {
    config: FusionConfig,
    /// Row-major projection matrix, output_dimensions x input_dimensions
    projection: Vec<f32>,
}

impl FusionLayer {
    /// Build the layer, materializing the seeded projection matrix
    pub fn new(config: FusionConfig) -> Self {
        let input = config.text_dimensions + config.image_dimensions;
        let mut rng = StdRng::seed_from_u64(config.seed);

        // Uniform entries scaled by 1/sqrt(input) keep projected norms near
        // one; the final re-normalization makes the invariant exact.
        let scale = 1.0 / (input as f32).sqrt();
        let projection: Vec<f32> = (0..config.output_dimensions * input)
            .map(|_| rng.gen_range(-1.0f32..1.0) * scale)
            .collect();

        Self { config, projection }
    }

    /// Output embedding dimensionality
    pub fn output_dimensions(&self) -> usize {
        self.config.output_dimensions
    }

    /// Fuse the two channel vectors into one unit-normalized embedding.
    ///
    /// An absent channel contributes zeros, so fusion naturally uses only
    /// the available channel; `used_modalities` records which ones were
    /// present. Both channels absent yields the tagged zero embedding.
    pub fn fuse(
        &self,
        text: &ChannelVector,
        image: &ChannelVector,
    ) -> Result<FusedEmbedding, FusionError> {
        if text.vector.len() != self.config.text_dimensions {
            return Err(FusionError::DimensionMismatch {
                expected: self.config.text_dimensions,
                got: text.vector.len(),
            });
        }
        if image.vector.len() != self.config.image_dimensions {
            return Err(FusionError::DimensionMismatch {
                expected: self.config.image_dimensions,
                got: image.vector.len(),
            });
        }

        let mut used_modalities = Vec::with_capacity(2);
        if !text.is_absent() {
            used_modalities.push(Modality::Text);
        }
        if !image.is_absent() {
            used_modalities.push(Modality::Image);
        }

        if used_modalities.is_empty() {
            return Ok(FusedEmbedding {
                embedding: Embedding::zeros(self.config.output_dimensions),
                used_modalities,
            });
        }

        // Normalize each channel so neither modality dominates on scale.
        let input_dims = self.config.text_dimensions + self.config.image_dimensions;
        let mut input = vec![0.0f32; input_dims];
        input[..self.config.text_dimensions].copy_from_slice(&text.vector);
        l2_normalize(&mut input[..self.config.text_dimensions]);
        input[self.config.text_dimensions..].copy_from_slice(&image.vector);
        l2_normalize(&mut input[self.config.text_dimensions..]);

        let mut output = vec![0.0f32; self.config.output_dimensions];
        for (row, out) in output.iter_mut().enumerate() {
            let weights = &self.projection[row * input_dims..(row + 1) * input_dims];
            *out = weights.iter().zip(input.iter()).map(|(w, x)| w * x).sum();
        }
        l2_normalize(&mut output);

        Ok(FusedEmbedding {
            embedding: Embedding::new(output),
            used_modalities,
        })
    }
}

impl Default for FusionLayer {
    fn default() -> Self {
        Self::new(FusionConfig::default())
    }
}

// ============================================================================
// TESTS
// ============================================================================
