//! # ContextMatch Core
//!
//! Contextual ad-matching engine: maps multimodal page content to the
//! closest advertising categories with sub-10ms search latency.
//!
//! - **Multimodal Embedding**: text and image channels encoded
//!   independently, fused into one 512-dimension unit vector
//! - **Category Index**: exhaustive flat scan over unit-normalized
//!   embeddings; exact results, cache-friendly, no ANN tuning
//! - **Confidence Matching**: rank-decayed confidence scores with
//!   keyword-overlap explanations
//! - **Pipeline Orchestration**: deadlines, fingerprint dedup,
//!   short-TTL caching, partial-failure degradation, stage telemetry
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use contextmatch_core::{AnalyzeRequest, ContentBundle, Pipeline, PipelineConfig};
//!
//! let pipeline = Pipeline::in_memory(PipelineConfig::default());
//! pipeline.load_taxonomy_snapshot("taxonomy.json".as_ref())?;
//!
//! let bundle = ContentBundle::from_text(
//!     "https://example.com/ev-review",
//!     "Electric vehicle battery range and charging review",
//! );
//! let response = pipeline.analyze(AnalyzeRequest::new(bundle)).await;
//! ```
//!
//! ## Feature Flags
//!
//! - `bundled-sqlite` (default): compile SQLite into the binary
//! - `embeddings`: ONNX text encoder (all-MiniLM-L6-v2 via fastembed)

#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(rustdoc::missing_crate_level_docs)]

// ============================================================================
// MODULES
// ============================================================================

pub mod content;
pub mod embedding;
pub mod encode;
pub mod fusion;
pub mod index;
pub mod matcher;
pub mod pipeline;
pub mod telemetry;

// ============================================================================
// PUBLIC API RE-EXPORTS
// ============================================================================

// Content model
pub use content::{
    ContentBundle, LayoutMetadata, RawImage, bundle_keywords, extract_keywords, fingerprint,
    normalize_text, tokenize,
};

// Embedding primitives
pub use embedding::{
    BATCH_SIZE, EMBEDDING_DIMENSIONS, Embedding, IMAGE_DIMENSIONS, MAX_TEXT_LENGTH,
    TEXT_DIMENSIONS, cosine_similarity, dot_product, l2_normalize,
};

// Encoder stage
pub use encode::{
    ChannelTag, ChannelVector, CoalescingEncoder, ComputeDevice, EncodeError, EncodedContent,
    ExecutionContext, HashingTextEncoder, ImageEncoder, ModalityEncoders, SignatureImageEncoder,
    TextEncoder,
};

#[cfg(feature = "embeddings")]
pub use encode::OnnxTextEncoder;

// Fusion layer
pub use fusion::{
    DEFAULT_FUSION_SEED, FusedEmbedding, FusionConfig, FusionError, FusionLayer, Modality,
};

// Category index
pub use index::{
    CategoryIndex, CategoryRecord, CategoryStore, FLAT_SCAN_SOFT_LIMIT, FlatIndex, IndexError,
    IndexStats, TaxonomyEntry, category_document, read_taxonomy_snapshot,
};

// Matcher
pub use matcher::{DEFAULT_RANK_DECAY, MatchResult, Matcher};

// Pipeline
pub use pipeline::{
    AnalysisOutcome, AnalyzeRequest, AnalyzeResponse, AnalyzeStatus, MemoryCache, Pipeline,
    PipelineConfig, PipelineError, ResultCache, StageTimings,
};

// Telemetry
pub use telemetry::{OperationSummary, PerformanceSample, TelemetryRecorder};

// ============================================================================
// VERSION INFO
// ============================================================================

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

// ============================================================================
// PRELUDE
// ============================================================================

/// Convenient imports for common usage
pub mod prelude {
    pub use crate::{
        AnalyzeRequest, AnalyzeResponse, AnalyzeStatus, CategoryIndex, ContentBundle,
        MatchResult, Matcher, ModalityEncoders, Pipeline, PipelineConfig, TaxonomyEntry,
    };
}
