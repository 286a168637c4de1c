//! Modality Encoders
//!
//! Maps raw text and raw images into fixed-dimension channel vectors via the
//! injected [`TextEncoder`] / [`ImageEncoder`] capabilities. The
//! [`ModalityEncoders`] facade owns the channel semantics:
//!
//! - empty text yields a zero vector tagged [`ChannelTag::NoText`]
//! - text above [`MAX_TEXT_LENGTH`](crate::embedding::MAX_TEXT_LENGTH) is truncated
//! - each image is encoded independently, then mean-pooled
//! - images that fail to decode are skipped and counted (soft failure)
//! - zero valid images yields a zero vector tagged [`ChannelTag::NoImage`]
//!
//! Encoding is compute-bound and runs on blocking threads; an
//! [`ExecutionContext`] distributes image work across the configured
//! devices. When the primary text encoder fails, the facade retries once on
//! the fallback encoder before surfacing the error.

mod coalesce;
mod hashing;
mod signature;

#[cfg(feature = "embeddings")]
#[cfg_attr(docsrs, doc(cfg(feature = "embeddings")))]
mod onnx;

pub use coalesce::CoalescingEncoder;
pub use hashing::HashingTextEncoder;
pub use signature::SignatureImageEncoder;

#[cfg(feature = "embeddings")]
pub use onnx::OnnxTextEncoder;

use std::sync::Arc;
use std::time::Duration;

use crate::content::{ContentBundle, RawImage, normalize_text};
use crate::embedding::BATCH_SIZE;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Encoder error type.
///
/// Clone is required so a single batch failure can be fanned out to every
/// request coalesced into that batch.
#[non_exhaustive]
#[derive(Debug, Clone, thiserror::Error)]
pub enum EncodeError {
    /// The encoder (or its execution device) is unavailable
    #[error("encoder unavailable: {0}")]
    Unavailable(String),
    /// Encoding failed for this input
    #[error("encoding failed: {0}")]
    Failed(String),
    /// Encoder produced a vector of unexpected dimensionality
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },
}

/// Encoder result type
pub type Result<T> = std::result::Result<T, EncodeError>;

// ============================================================================
// CAPABILITY TRAITS
// ============================================================================

/// Capability: map text to a fixed-dimension vector.
///
/// Implementations must be deterministic given identical input and weights.
pub trait TextEncoder: Send + Sync + 'static {
    /// Encode one text into a vector of `dimensions()` floats
    fn encode(&self, text: &str) -> Result<Vec<f32>>;

    /// Encode a batch in one pass. The default loops over `encode`;
    /// hardware-backed encoders override this with a real batched pass.
    fn encode_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        texts.iter().map(|t| self.encode(t)).collect()
    }

    /// Output dimensionality
    fn dimensions(&self) -> usize;

    /// Human-readable encoder name for logs
    fn name(&self) -> &'static str;
}

/// Capability: map one decoded image to a fixed-dimension vector
pub trait ImageEncoder: Send + Sync + 'static {
    /// Encode a decoded image into a vector of `dimensions()` floats
    fn encode(&self, image: &image::DynamicImage) -> Result<Vec<f32>>;

    /// Output dimensionality
    fn dimensions(&self) -> usize;

    /// Human-readable encoder name for logs
    fn name(&self) -> &'static str;
}

// ============================================================================
// CHANNEL VECTORS
// ============================================================================

/// Provenance tag for a per-modality channel vector
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelTag {
    /// Vector produced from text content
    Text,
    /// Zero vector: no text was present
    NoText,
    /// Vector produced from one or more images
    Image,
    /// Zero vector: no decodable image was present
    NoImage,
}

impl ChannelTag {
    /// True for the absent-channel sentinel tags
    pub fn is_absent(self) -> bool {
        matches!(self, ChannelTag::NoText | ChannelTag::NoImage)
    }
}

/// A per-modality vector with its provenance tag
#[derive(Debug, Clone)]
pub struct ChannelVector {
    /// The channel vector (zero-filled when the channel is absent)
    pub vector: Vec<f32>,
    /// Provenance tag
    pub tag: ChannelTag,
}

impl ChannelVector {
    /// Zero vector for an absent channel
    pub fn absent(dimensions: usize, tag: ChannelTag) -> Self {
        debug_assert!(tag.is_absent());
        Self {
            vector: vec![0.0; dimensions],
            tag,
        }
    }

    /// True when the channel carried no content
    pub fn is_absent(&self) -> bool {
        self.tag.is_absent()
    }
}

/// Output of the encoder stage for one request
#[derive(Debug, Clone)]
pub struct EncodedContent {
    /// Text channel vector
    pub text: ChannelVector,
    /// Image channel vector (mean pool over valid images)
    pub image: ChannelVector,
    /// Number of images successfully encoded
    pub encoded_images: usize,
    /// Number of images skipped because decode or encode failed
    pub skipped_images: usize,
}

// ============================================================================
// EXECUTION CONTEXT
// ============================================================================

/// A compute device the encoders may run on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComputeDevice {
    /// General-purpose CPU execution
    Cpu,
    /// Isolated accelerator identified by ordinal
    Accelerator(u32),
}

/// Pluggable execution context: single device, multi-device, or CPU
/// fallback. Core logic stays device-agnostic; the context only controls
/// how image work is partitioned across blocking workers.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    devices: Vec<ComputeDevice>,
}

impl ExecutionContext {
    /// Context with an explicit device list
    pub fn new(devices: Vec<ComputeDevice>) -> Self {
        let devices = if devices.is_empty() {
            vec![ComputeDevice::Cpu]
        } else {
            devices
        };
        Self { devices }
    }

    /// Single-threaded CPU fallback context
    pub fn cpu_only() -> Self {
        Self::new(vec![ComputeDevice::Cpu])
    }

    /// Number of devices in this context
    pub fn device_count(&self) -> usize {
        self.devices.len()
    }

    /// Partition items round-robin across the devices
    fn partition<T: Clone>(&self, items: &[T]) -> Vec<Vec<T>> {
        let n = self.devices.len();
        let mut parts: Vec<Vec<T>> = vec![Vec::new(); n];
        for (i, item) in items.iter().enumerate() {
            parts[i % n].push(item.clone());
        }
        parts.into_iter().filter(|p| !p.is_empty()).collect()
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::cpu_only()
    }
}

// ============================================================================
// MODALITY ENCODERS FACADE
// ============================================================================

/// The encoder stage: injected text/image capabilities plus channel
/// semantics (truncation, zero-vector tagging, mean pooling, soft image
/// failures, fallback retry).
pub struct ModalityEncoders {
    text: Arc<dyn TextEncoder>,
    text_fallback: Option<Arc<dyn TextEncoder>>,
    image: Arc<dyn ImageEncoder>,
    exec: ExecutionContext,
    coalescer: Option<CoalescingEncoder>,
}

impl ModalityEncoders {
    /// Create the facade from injected encoder capabilities
    pub fn new(
        text: Arc<dyn TextEncoder>,
        image: Arc<dyn ImageEncoder>,
        exec: ExecutionContext,
    ) -> Self {
        Self {
            text,
            text_fallback: None,
            image,
            exec,
            coalescer: None,
        }
    }

    /// Default deterministic CPU encoders (hashing text + signature image)
    pub fn with_defaults() -> Self {
        Self::new(
            Arc::new(HashingTextEncoder::default()),
            Arc::new(SignatureImageEncoder::default()),
            ExecutionContext::cpu_only(),
        )
    }

    /// Install a fallback text encoder used for the single retry when the
    /// primary encoder fails
    pub fn with_text_fallback(mut self, fallback: Arc<dyn TextEncoder>) -> Self {
        self.text_fallback = Some(fallback);
        self
    }

    /// Coalesce concurrent text encodes arriving within `window` into one
    /// batched pass of at most `max_batch` inputs
    pub fn with_coalescing(mut self, window: Duration, max_batch: usize) -> Self {
        self.coalescer = Some(CoalescingEncoder::spawn(
            self.text.clone(),
            window,
            max_batch,
        ));
        self
    }

    /// Text channel dimensionality
    pub fn text_dimensions(&self) -> usize {
        self.text.dimensions()
    }

    /// Image channel dimensionality
    pub fn image_dimensions(&self) -> usize {
        self.image.dimensions()
    }

    /// Encode a full bundle into per-modality channel vectors.
    ///
    /// Text failures (after the fallback retry) are hard errors; image
    /// failures are soft and reported through `skipped_images`.
    pub async fn encode(&self, bundle: &ContentBundle) -> Result<EncodedContent> {
        let text = self.encode_text(&bundle.text).await?;
        let (image, encoded_images, skipped_images) = self.encode_images(&bundle.images).await;

        Ok(EncodedContent {
            text,
            image,
            encoded_images,
            skipped_images,
        })
    }

    /// Encode the text channel
    pub async fn encode_text(&self, raw_text: &str) -> Result<ChannelVector> {
        let text = normalize_text(raw_text);
        if text.is_empty() {
            return Ok(ChannelVector::absent(
                self.text.dimensions(),
                ChannelTag::NoText,
            ));
        }

        let primary = match &self.coalescer {
            Some(coalescer) => coalescer.encode(&text).await,
            None => {
                let encoder = self.text.clone();
                let owned = text.clone();
                run_blocking(move || checked_encode(encoder.as_ref(), &owned)).await
            }
        };

        let vector = match primary {
            Ok(vector) => vector,
            Err(e) => {
                let Some(fallback) = &self.text_fallback else {
                    return Err(e);
                };
                tracing::warn!(
                    encoder = self.text.name(),
                    fallback = fallback.name(),
                    error = %e,
                    "primary text encoder failed, retrying on fallback"
                );
                let encoder = fallback.clone();
                let owned = text.clone();
                run_blocking(move || checked_encode(encoder.as_ref(), &owned)).await?
            }
        };

        Ok(ChannelVector {
            vector,
            tag: ChannelTag::Text,
        })
    }

    /// Encode the image channel: per-image encode distributed across the
    /// execution context, mean-pooled. Returns (channel, encoded, skipped).
    pub async fn encode_images(&self, images: &[RawImage]) -> (ChannelVector, usize, usize) {
        let dims = self.image.dimensions();
        if images.is_empty() {
            return (ChannelVector::absent(dims, ChannelTag::NoImage), 0, 0);
        }

        let mut handles = Vec::new();
        for part in self.exec.partition(images) {
            let encoder = self.image.clone();
            handles.push(tokio::task::spawn_blocking(move || {
                let mut vectors: Vec<Vec<f32>> = Vec::with_capacity(part.len());
                let mut skipped = 0usize;
                for raw in &part {
                    match image::load_from_memory(&raw.bytes) {
                        Ok(decoded) => match encoder.encode(&decoded) {
                            Ok(v) if v.len() == encoder.dimensions() => vectors.push(v),
                            Ok(_) | Err(_) => skipped += 1,
                        },
                        Err(e) => {
                            tracing::debug!(
                                url = raw.source_url.as_deref().unwrap_or("<inline>"),
                                error = %e,
                                "skipping undecodable image"
                            );
                            skipped += 1;
                        }
                    }
                }
                (vectors, skipped)
            }));
        }

        let mut vectors: Vec<Vec<f32>> = Vec::new();
        let mut skipped = 0usize;
        for handle in handles {
            match handle.await {
                Ok((part_vectors, part_skipped)) => {
                    vectors.extend(part_vectors);
                    skipped += part_skipped;
                }
                Err(e) => {
                    tracing::warn!(error = %e, "image encode worker failed");
                    skipped += 1;
                }
            }
        }

        if vectors.is_empty() {
            return (
                ChannelVector::absent(dims, ChannelTag::NoImage),
                0,
                skipped,
            );
        }

        // Mean pool; the fusion layer re-normalizes each channel.
        let encoded = vectors.len();
        let mut pooled = vec![0.0f32; dims];
        for v in &vectors {
            for (acc, x) in pooled.iter_mut().zip(v.iter()) {
                *acc += x;
            }
        }
        for x in &mut pooled {
            *x /= encoded as f32;
        }

        (
            ChannelVector {
                vector: pooled,
                tag: ChannelTag::Image,
            },
            encoded,
            skipped,
        )
    }

    /// Synchronously encode a batch of documents with the primary text
    /// encoder (fallback retry included). Used by taxonomy loading, which
    /// runs at startup off the request path.
    pub fn encode_documents(&self, documents: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(documents.len());
        for chunk in documents.chunks(BATCH_SIZE) {
            let vectors = match self.text.encode_batch(chunk) {
                Ok(v) => v,
                Err(e) => match &self.text_fallback {
                    Some(fallback) => {
                        tracing::warn!(
                            encoder = self.text.name(),
                            error = %e,
                            "batch encode failed, retrying on fallback"
                        );
                        fallback.encode_batch(chunk)?
                    }
                    None => return Err(e),
                },
            };
            for v in &vectors {
                if v.len() != self.text.dimensions() {
                    return Err(EncodeError::DimensionMismatch {
                        expected: self.text.dimensions(),
                        got: v.len(),
                    });
                }
            }
            out.extend(vectors);
        }
        Ok(out)
    }
}

impl Default for ModalityEncoders {
    fn default() -> Self {
        Self::with_defaults()
    }
}

fn checked_encode(encoder: &dyn TextEncoder, text: &str) -> Result<Vec<f32>> {
    let vector = encoder.encode(text)?;
    if vector.len() != encoder.dimensions() {
        return Err(EncodeError::DimensionMismatch {
            expected: encoder.dimensions(),
            got: vector.len(),
        });
    }
    Ok(vector)
}

async fn run_blocking<T: Send + 'static>(
    f: impl FnOnce() -> Result<T> + Send + 'static,
) -> Result<T> {
    tokio::task::spawn_blocking(f)
        .await
        .map_err(|e| EncodeError::Failed(format!("encode task aborted: {e}")))?
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::{TEXT_DIMENSIONS, l2_normalize};

    /// Encoder that always fails, for fallback-path tests
    struct BrokenEncoder;

    impl TextEncoder for BrokenEncoder {
        fn encode(&self, _text: &str) -> Result<Vec<f32>> {
            Err(EncodeError::Unavailable("device offline".into()))
        }
        fn dimensions(&self) -> usize {
            TEXT_DIMENSIONS
        }
        fn name(&self) -> &'static str {
            "broken"
        }
    }

    fn one_pixel_png() -> Vec<u8> {
        // Render a tiny image through the image crate so the fixture stays
        // valid if encoders get pickier.
        let img = image::RgbImage::from_pixel(4, 4, image::Rgb([200, 30, 30]));
        let mut bytes = std::io::Cursor::new(Vec::new());
        image::DynamicImage::ImageRgb8(img)
            .write_to(&mut bytes, image::ImageFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[tokio::test]
    async fn test_empty_text_yields_tagged_zero_vector() {
        let encoders = ModalityEncoders::with_defaults();
        let channel = encoders.encode_text("   ").await.unwrap();
        assert_eq!(channel.tag, ChannelTag::NoText);
        assert!(channel.vector.iter().all(|x| *x == 0.0));
        assert_eq!(channel.vector.len(), TEXT_DIMENSIONS);
    }

    #[tokio::test]
    async fn test_text_encoding_is_deterministic() {
        let encoders = ModalityEncoders::with_defaults();
        let a = encoders.encode_text("electric vehicles").await.unwrap();
        let b = encoders.encode_text("electric vehicles").await.unwrap();
        assert_eq!(a.vector, b.vector);
        assert_eq!(a.tag, ChannelTag::Text);
    }

    #[tokio::test]
    async fn test_no_images_yields_tagged_zero_vector() {
        let encoders = ModalityEncoders::with_defaults();
        let (channel, encoded, skipped) = encoders.encode_images(&[]).await;
        assert_eq!(channel.tag, ChannelTag::NoImage);
        assert_eq!((encoded, skipped), (0, 0));
    }

    #[tokio::test]
    async fn test_undecodable_image_is_soft_skipped() {
        let encoders = ModalityEncoders::with_defaults();
        let images = vec![
            RawImage {
                bytes: b"definitely not an image".to_vec(),
                source_url: None,
            },
            RawImage {
                bytes: one_pixel_png(),
                source_url: None,
            },
        ];
        let (channel, encoded, skipped) = encoders.encode_images(&images).await;
        assert_eq!(channel.tag, ChannelTag::Image);
        assert_eq!(encoded, 1);
        assert_eq!(skipped, 1);
    }

    #[tokio::test]
    async fn test_all_images_undecodable_yields_no_image() {
        let encoders = ModalityEncoders::with_defaults();
        let images = vec![RawImage {
            bytes: vec![0, 1, 2, 3],
            source_url: None,
        }];
        let (channel, encoded, skipped) = encoders.encode_images(&images).await;
        assert_eq!(channel.tag, ChannelTag::NoImage);
        assert_eq!((encoded, skipped), (0, 1));
    }

    #[tokio::test]
    async fn test_fallback_retry_recovers_from_primary_failure() {
        let encoders = ModalityEncoders::new(
            Arc::new(BrokenEncoder),
            Arc::new(SignatureImageEncoder::default()),
            ExecutionContext::cpu_only(),
        )
        .with_text_fallback(Arc::new(HashingTextEncoder::default()));

        let channel = encoders.encode_text("some content").await.unwrap();
        assert_eq!(channel.tag, ChannelTag::Text);
    }

    #[tokio::test]
    async fn test_no_fallback_surfaces_unavailable() {
        let encoders = ModalityEncoders::new(
            Arc::new(BrokenEncoder),
            Arc::new(SignatureImageEncoder::default()),
            ExecutionContext::cpu_only(),
        );
        let err = encoders.encode_text("some content").await.unwrap_err();
        assert!(matches!(err, EncodeError::Unavailable(_)));
    }

    #[tokio::test]
    async fn test_multi_device_mean_pool_matches_single_device() {
        let single = ModalityEncoders::with_defaults();
        let multi = ModalityEncoders::new(
            Arc::new(HashingTextEncoder::default()),
            Arc::new(SignatureImageEncoder::default()),
            ExecutionContext::new(vec![
                ComputeDevice::Accelerator(0),
                ComputeDevice::Accelerator(1),
            ]),
        );

        let images: Vec<RawImage> = (0..4)
            .map(|_| RawImage {
                bytes: one_pixel_png(),
                source_url: None,
            })
            .collect();

        let (a, _, _) = single.encode_images(&images).await;
        let (b, _, _) = multi.encode_images(&images).await;

        let mut av = a.vector.clone();
        let mut bv = b.vector.clone();
        l2_normalize(&mut av);
        l2_normalize(&mut bv);
        for (x, y) in av.iter().zip(bv.iter()) {
            assert!((x - y).abs() < 1e-5);
        }
    }
}
