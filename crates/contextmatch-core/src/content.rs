//! Content Model and Normalization
//!
//! The [`ContentBundle`] is the per-request input to the pipeline: extracted
//! text, raw (undecoded) image buffers, and layout metadata supplied by an
//! external content extractor. This module also owns text normalization,
//! keyword extraction, and the content fingerprint used for deduplication.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

use crate::embedding::MAX_TEXT_LENGTH;

// ============================================================================
// TYPES
// ============================================================================

/// A raw, undecoded image as delivered by the content extractor
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RawImage {
    /// Encoded image bytes (PNG, JPEG, GIF, WebP)
    pub bytes: Vec<u8>,
    /// Where the image came from, if known
    #[serde(default)]
    pub source_url: Option<String>,
}

/// Layout metadata extracted alongside text and images
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutMetadata {
    /// Page title
    #[serde(default)]
    pub title: Option<String>,
    /// Section headings in document order
    #[serde(default)]
    pub headings: Vec<String>,
    /// Language hint from the extractor
    #[serde(default)]
    pub language: Option<String>,
    /// True when extraction was best-effort (some content missing)
    #[serde(default)]
    pub partial: bool,
}

/// Multimodal content for one analysis request
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContentBundle {
    /// Source identifier (typically the page URL)
    pub source: String,
    /// Extracted text content
    #[serde(default)]
    pub text: String,
    /// Raw image buffers
    #[serde(default)]
    pub images: Vec<RawImage>,
    /// Layout metadata
    #[serde(default)]
    pub layout: LayoutMetadata,
}

impl ContentBundle {
    /// Create a text-only bundle
    pub fn from_text(source: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            text: text.into(),
            ..Default::default()
        }
    }

    /// True when the bundle carries neither text nor images
    pub fn is_empty(&self) -> bool {
        self.text.trim().is_empty() && self.images.is_empty()
    }
}

// ============================================================================
// NORMALIZATION
// ============================================================================

/// Normalize extracted text: strip control characters, collapse whitespace
/// runs, and clamp to [`MAX_TEXT_LENGTH`] characters.
pub fn normalize_text(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len().min(MAX_TEXT_LENGTH));
    let mut last_was_space = true;

    for ch in raw.chars() {
        if ch.is_control() && ch != '\n' && ch != '\t' {
            continue;
        }
        if ch.is_whitespace() {
            if !last_was_space {
                out.push(' ');
                last_was_space = true;
            }
        } else {
            out.push(ch);
            last_was_space = false;
        }
        if out.chars().count() >= MAX_TEXT_LENGTH {
            break;
        }
    }

    while out.ends_with(' ') {
        out.pop();
    }
    out
}

// ============================================================================
// KEYWORDS
// ============================================================================

/// Common tokens that never make useful explanation keywords
const STOPWORDS: &[&str] = &[
    "a", "an", "and", "are", "as", "at", "be", "but", "by", "for", "from",
    "has", "have", "in", "into", "is", "it", "its", "of", "on", "or", "that",
    "the", "their", "this", "to", "was", "were", "will", "with", "you",
    "your", "we", "our", "they", "he", "she", "his", "her", "not", "can",
];

fn is_stopword(token: &str) -> bool {
    STOPWORDS.contains(&token)
}

/// Tokenize into lowercase alphanumeric tokens of length >= 3
pub fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric())
        .filter(|t| t.len() >= 3)
        .map(|t| t.to_lowercase())
        .filter(|t| !is_stopword(t))
        .collect()
}

/// Extract up to `max` keywords, ranked by frequency then alphabetically.
/// Alphabetical tie-break keeps the output deterministic.
pub fn extract_keywords(text: &str, max: usize) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for token in tokenize(text) {
        *counts.entry(token).or_default() += 1;
    }

    let mut ranked: Vec<(String, usize)> = counts.into_iter().collect();
    ranked.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    ranked.into_iter().take(max).map(|(t, _)| t).collect()
}

/// Keywords for a full bundle: body text plus title and headings.
/// Title/heading tokens are counted twice so prominent page structure
/// outranks body noise.
pub fn bundle_keywords(bundle: &ContentBundle, max: usize) -> Vec<String> {
    let mut weighted = String::with_capacity(bundle.text.len() + 128);
    weighted.push_str(&bundle.text);
    for part in bundle.layout.title.iter().chain(bundle.layout.headings.iter()) {
        weighted.push(' ');
        weighted.push_str(part);
        weighted.push(' ');
        weighted.push_str(part);
    }
    extract_keywords(&weighted, max)
}

// ============================================================================
// FINGERPRINT
// ============================================================================

/// Stable fingerprint of a bundle's content, used for request deduplication
/// and the short-lived result cache. SHA-256 over the normalized text, the
/// raw image bytes, and the title.
pub fn fingerprint(bundle: &ContentBundle) -> String {
    let mut hasher = Sha256::new();
    hasher.update(normalize_text(&bundle.text).as_bytes());
    hasher.update([0u8]);
    for image in &bundle.images {
        hasher.update(&image.bytes);
        hasher.update([0u8]);
    }
    if let Some(title) = &bundle.layout.title {
        hasher.update(title.as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

// ============================================================================
// TESTS
// ============================================================================
