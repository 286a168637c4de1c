//! Embedding Vector Type
//!
//! Fixed-dimension float vectors shared by the encoders, the fusion layer,
//! and the category index. All embeddings that leave a pipeline stage are
//! L2-normalized; zero vectors are reserved for absent modality channels.

// ============================================================================
// CONSTANTS
// ============================================================================

/// Dimensions of the fused content embedding (and of category embeddings).
pub const EMBEDDING_DIMENSIONS: usize = 512;

/// Dimensions of the text channel vector.
pub const TEXT_DIMENSIONS: usize = 384;

/// Dimensions of the image channel vector.
pub const IMAGE_DIMENSIONS: usize = 512;

/// Maximum text length for encoding (characters; longer input is truncated).
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Batch size for efficient batch encoding.
pub const BATCH_SIZE: usize = 32;

/// Tolerance for the unit-norm invariant.
pub const NORM_TOLERANCE: f32 = 1e-5;

// ============================================================================
// EMBEDDING TYPE
// ============================================================================

/// An embedding vector with its dimensionality
#[derive(Debug, Clone, PartialEq)]
pub struct Embedding {
    /// The embedding vector
    pub vector: Vec<f32>,
    /// Dimensions of the vector
    pub dimensions: usize,
}

impl Embedding {
    /// Create a new embedding from a vector
    pub fn new(vector: Vec<f32>) -> Self {
        let dimensions = vector.len();
        Self { vector, dimensions }
    }

    /// Create a zero embedding of the given dimensionality
    pub fn zeros(dimensions: usize) -> Self {
        Self {
            vector: vec![0.0; dimensions],
            dimensions,
        }
    }

    /// L2 norm of the vector
    pub fn norm(&self) -> f32 {
        self.vector.iter().map(|x| x * x).sum::<f32>().sqrt()
    }

    /// True if every component is zero (absent-channel sentinel)
    pub fn is_zero(&self) -> bool {
        self.vector.iter().all(|x| *x == 0.0)
    }

    /// Normalize the vector to unit length. Zero vectors are left untouched.
    pub fn normalize(&mut self) {
        let norm = self.norm();
        if norm > 0.0 {
            for x in &mut self.vector {
                *x /= norm;
            }
        }
    }

    /// Check if the embedding is unit length within [`NORM_TOLERANCE`]
    pub fn is_normalized(&self) -> bool {
        (self.norm() - 1.0).abs() < NORM_TOLERANCE
    }

    /// Compute cosine similarity with another embedding
    pub fn cosine_similarity(&self, other: &Embedding) -> f32 {
        if self.dimensions != other.dimensions {
            return 0.0;
        }
        cosine_similarity(&self.vector, &other.vector)
    }

    /// Convert to little-endian bytes for storage
    pub fn to_bytes(&self) -> Vec<u8> {
        self.vector.iter().flat_map(|f| f.to_le_bytes()).collect()
    }

    /// Create from little-endian bytes
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        if bytes.len() % 4 != 0 {
            return None;
        }
        let vector: Vec<f32> = bytes
            .chunks_exact(4)
            .map(|chunk| f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();
        Some(Self::new(vector))
    }
}

// ============================================================================
// VECTOR MATH
// ============================================================================

/// Normalize a slice in place to unit length. Zero slices are left untouched.
#[inline]
pub fn l2_normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in vector {
            *x /= norm;
        }
    }
}

/// Compute cosine similarity between two vectors
#[inline]
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() {
        return 0.0;
    }

    let mut dot = 0.0_f32;
    let mut norm_a = 0.0_f32;
    let mut norm_b = 0.0_f32;

    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        norm_a += x * x;
        norm_b += y * y;
    }

    let denominator = (norm_a * norm_b).sqrt();
    if denominator > 0.0 { dot / denominator } else { 0.0 }
}

/// Compute dot product between two vectors.
/// For unit-normalized vectors this equals cosine similarity.
#[inline]
pub fn dot_product(a: &[f32], b: &[f32]) -> f32 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

// ============================================================================
// TESTS
// ============================================================================
