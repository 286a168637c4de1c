//! ONNX Text Encoder (optional)
//!
//! fastembed-backed text encoder using all-MiniLM-L6-v2 (384 dimensions,
//! local inference, no external API). Enabled with the `embeddings`
//! feature; the hashing encoder remains the dependency-free fallback and
//! the two share the same channel dimensionality.

use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::{Mutex, OnceLock};

use super::{EncodeError, Result, TextEncoder};
use crate::embedding::{TEXT_DIMENSIONS, l2_normalize};

/// Model shared process-wide; fastembed's API requires &mut for inference.
static MODEL: OnceLock<std::result::Result<Mutex<TextEmbedding>, String>> = OnceLock::new();

/// Cache directory for downloaded model files.
/// Respects CONTEXTMATCH_MODEL_CACHE, then falls back to the platform
/// cache directory.
fn cache_dir() -> std::path::PathBuf {
    if let Ok(path) = std::env::var("CONTEXTMATCH_MODEL_CACHE") {
        return std::path::PathBuf::from(path);
    }
    if let Some(dirs) = directories::ProjectDirs::from("io", "contextmatch", "core") {
        return dirs.cache_dir().join("fastembed");
    }
    std::path::PathBuf::from(".fastembed_cache")
}

fn model() -> Result<std::sync::MutexGuard<'static, TextEmbedding>> {
    let result = MODEL.get_or_init(|| {
        let cache = cache_dir();
        if let Err(e) = std::fs::create_dir_all(&cache) {
            tracing::warn!(path = %cache.display(), error = %e, "could not create model cache dir");
        }

        let options = InitOptions::new(EmbeddingModel::AllMiniLML6V2)
            .with_show_download_progress(false)
            .with_cache_dir(cache);

        TextEmbedding::try_new(options).map(Mutex::new).map_err(|e| {
            format!(
                "failed to initialize all-MiniLM-L6-v2: {e}. \
                 Ensure the ONNX runtime is available and model files can be downloaded."
            )
        })
    });

    match result {
        Ok(model) => model
            .lock()
            .map_err(|e| EncodeError::Unavailable(format!("model lock poisoned: {e}"))),
        Err(err) => Err(EncodeError::Unavailable(err.clone())),
    }
}

/// ONNX text encoder (all-MiniLM-L6-v2 via fastembed)
#[derive(Debug, Clone, Default)]
pub struct OnnxTextEncoder;

impl OnnxTextEncoder {
    /// Eagerly initialize the model (downloads on first use)
    pub fn init() -> Result<()> {
        model().map(|_| ())
    }
}

impl TextEncoder for OnnxTextEncoder {
    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let batch = self.encode_batch(std::slice::from_ref(&text.to_string()))?;
        batch
            .into_iter()
            .next()
            .ok_or_else(|| EncodeError::Failed("no embedding generated".into()))
    }

    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        if texts.is_empty() {
            return Ok(vec![]);
        }

        let mut model = model()?;
        let refs: Vec<&str> = texts.iter().map(|t| t.as_str()).collect();
        let embeddings = model
            .embed(refs, None)
            .map_err(|e| EncodeError::Failed(e.to_string()))?;

        Ok(embeddings
            .into_iter()
            .map(|mut v| {
                v.truncate(TEXT_DIMENSIONS);
                l2_normalize(&mut v);
                v
            })
            .collect())
    }

    fn dimensions(&self) -> usize {
        TEXT_DIMENSIONS
    }

    fn name(&self) -> &'static str {
        "onnx-minilm-l6-v2"
    }
}
