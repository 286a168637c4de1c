//! Confidence Matcher
//!
//! Turns raw index hits into ranked match results: confidence is the
//! similarity (clamped to [0, 1]) scaled by a rank-decay factor, so two
//! near-tied candidates still produce a strict confidence ordering.
//! Explanations surface the keyword overlap between the content and the
//! matched category; matching never fails on missing keywords, it just
//! falls back to a generic attribution.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::fusion::FusedEmbedding;
use crate::index::{CategoryIndex, CategoryRecord, IndexError};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Default per-rank confidence decay (rank 0 keeps full similarity,
/// rank 1 is scaled by 0.95, and so on)
pub const DEFAULT_RANK_DECAY: f32 = 0.05;

/// Explanation used when no keywords overlap
const GENERIC_EXPLANATION: &str = "semantic similarity";

// ============================================================================
// TYPES
// ============================================================================

/// One ranked category match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    /// Matched category id
    pub category_id: String,
    /// Matched category name
    pub category_name: String,
    /// Raw cosine similarity between content and category embeddings
    pub similarity: f32,
    /// Rank-decayed confidence in [0, 1]
    pub confidence: f32,
    /// Keyword overlap that supports the match, or a generic attribution
    pub explanation: Vec<String>,
    /// Taxonomy source tag of the matched category
    pub source: String,
}

// ============================================================================
// MATCHER
// ============================================================================

/// Ranks index hits into confidence-ordered match results
#[derive(Debug, Clone)]
pub struct Matcher {
    decay: f32,
}

impl Default for Matcher {
    fn default() -> Self {
        Self::new(DEFAULT_RANK_DECAY)
    }
}

impl Matcher {
    /// Create a matcher with the given per-rank decay
    pub fn new(decay: f32) -> Self {
        Self {
            decay: decay.clamp(0.0, 1.0),
        }
    }

    /// Rank the top `top_k` categories for a fused content embedding.
    ///
    /// Empty content (no modality contributed) is a well-defined query with
    /// zero matches, not an error. Candidates below `min_confidence` are
    /// dropped after decay.
    pub fn rank(
        &self,
        index: &CategoryIndex,
        fused: &FusedEmbedding,
        content_keywords: &[String],
        top_k: usize,
        min_confidence: f32,
    ) -> Result<Vec<MatchResult>, IndexError> {
        if fused.is_empty_content() {
            return Ok(Vec::new());
        }

        let hits = index.search(&fused.embedding.vector, top_k)?;

        let mut matches: Vec<MatchResult> = hits
            .into_iter()
            .enumerate()
            .map(|(rank, (record, similarity))| {
                self.score(rank, &record, similarity, content_keywords)
            })
            .filter(|m| m.confidence >= min_confidence)
            .collect();

        // Hits arrive similarity-ordered; decay is monotone in rank, so this
        // sort only settles ties deterministically.
        matches.sort_by(|a, b| {
            b.confidence
                .partial_cmp(&a.confidence)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.category_id.cmp(&b.category_id))
        });

        Ok(matches)
    }

    fn score(
        &self,
        rank: usize,
        record: &Arc<CategoryRecord>,
        similarity: f32,
        content_keywords: &[String],
    ) -> MatchResult {
        let decay_factor = (1.0 - rank as f32 * self.decay).max(0.0);
        let confidence = similarity.clamp(0.0, 1.0) * decay_factor;

        MatchResult {
            category_id: record.id.clone(),
            category_name: record.name.clone(),
            similarity,
            confidence,
            explanation: explain(content_keywords, &record.keywords),
            source: record.source.clone(),
        }
    }
}

/// Sorted keyword intersection, or the generic attribution when empty
fn explain(content_keywords: &[String], category_keywords: &[String]) -> Vec<String> {
    let mut overlap: Vec<String> = content_keywords
        .iter()
        .filter(|k| category_keywords.iter().any(|c| c == *k))
        .cloned()
        .collect();
    overlap.sort();
    overlap.dedup();

    if overlap.is_empty() {
        vec![GENERIC_EXPLANATION.to_string()]
    } else {
        overlap
    }
}

// ============================================================================
// TESTS
// ============================================================================
