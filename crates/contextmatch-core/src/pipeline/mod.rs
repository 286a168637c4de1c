//! Analysis Pipeline
//!
//! Orchestrates one content analysis end to end: extraction, encoding,
//! fusion, search, ranking. The pipeline owns the operational semantics
//! around the stages:
//!
//! - per-request deadline; an expired request answers `TIMEOUT` while the
//!   underlying work runs to completion and populates the cache
//! - fingerprint dedup: identical in-flight content is computed once and
//!   the result fanned out to every waiter
//! - short-TTL result cache keyed by content fingerprint
//! - partial failures degrade the status, they never drop the response
//! - batch analysis with bounded concurrency, one status per entry
//! - per-stage latency telemetry
//!
//! `analyze` itself is infallible: every failure mode maps to a structured
//! [`AnalyzeStatus`] so callers always get a response envelope.

mod cache;

pub use cache::{MemoryCache, ResultCache};

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::watch;

use crate::content::{ContentBundle, bundle_keywords, extract_keywords, fingerprint};
use crate::embedding::EMBEDDING_DIMENSIONS;
use crate::encode::{ChannelTag, ChannelVector, EncodeError, ModalityEncoders};
use crate::fusion::{FusionError, FusionLayer, Modality};
use crate::index::{
    CategoryIndex, CategoryRecord, IndexError, TaxonomyEntry, category_document,
    read_taxonomy_snapshot,
};
use crate::matcher::{DEFAULT_RANK_DECAY, MatchResult, Matcher};
use crate::telemetry::TelemetryRecorder;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Pipeline error type, for the control-plane paths (taxonomy loading,
/// startup). The request path reports failures through [`AnalyzeStatus`].
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// Encoder failure
    #[error(transparent)]
    Encode(#[from] EncodeError),
    /// Fusion failure
    #[error(transparent)]
    Fusion(#[from] FusionError),
    /// Index failure
    #[error(transparent)]
    Index(#[from] IndexError),
}

/// Pipeline result type
pub type Result<T> = std::result::Result<T, PipelineError>;

// ============================================================================
// CONFIGURATION
// ============================================================================

/// Keywords extracted from content for match explanations
const CONTENT_KEYWORDS: usize = 16;
/// Keywords derived per category at load time
const CATEGORY_KEYWORDS: usize = 16;

/// Pipeline configuration
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Upper bound on requested matches per analysis
    pub top_k_limit: usize,
    /// Matches returned when the request does not specify `topK`
    pub default_top_k: usize,
    /// End-to-end deadline per request
    pub total_budget: Duration,
    /// Result cache time-to-live
    pub cache_ttl: Duration,
    /// Result cache capacity (entries)
    pub cache_capacity: usize,
    /// Text-encode coalescing window; None disables coalescing
    pub coalescing_window: Option<Duration>,
    /// Max requests merged into one coalesced batch
    pub coalescing_max_batch: usize,
    /// Per-rank confidence decay
    pub rank_decay: f32,
    /// Analyses run concurrently within one batch call
    pub batch_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            top_k_limit: 50,
            default_top_k: 3,
            total_budget: Duration::from_secs(10),
            cache_ttl: Duration::from_secs(30),
            cache_capacity: 1024,
            coalescing_window: None,
            coalescing_max_batch: 32,
            rank_decay: DEFAULT_RANK_DECAY,
            batch_concurrency: 4,
        }
    }
}

// ============================================================================
// REQUEST / RESPONSE TYPES
// ============================================================================

/// Structured outcome code for one analysis
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "code", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AnalyzeStatus {
    /// All stages completed
    Success,
    /// Analysis completed with degraded inputs or stages
    Partial {
        /// What degraded
        reason: String,
    },
    /// The request deadline expired before a result was available
    Timeout,
    /// The category index has no records loaded yet
    IndexNotReady,
    /// The request failed validation
    InvalidInput {
        /// What was invalid
        reason: String,
    },
}

/// Per-stage latency breakdown for one analysis
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StageTimings {
    /// Text normalization, keyword extraction, fingerprinting
    pub extraction_ms: f64,
    /// Encoding and fusion
    pub embedding_ms: f64,
    /// Index scan and ranking
    pub search_ms: f64,
    /// Wall-clock total as observed by the caller
    pub total_ms: f64,
}

/// One analysis request
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeRequest {
    /// The content to analyze
    #[serde(flatten)]
    pub bundle: ContentBundle,
    /// Number of matches to return; defaults from [`PipelineConfig`]
    #[serde(default)]
    pub top_k: Option<usize>,
    /// Minimum confidence for returned matches
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,
}

fn default_min_confidence() -> f32 {
    0.1
}

impl AnalyzeRequest {
    /// Request with pipeline defaults for `top_k` and `min_confidence`
    pub fn new(bundle: ContentBundle) -> Self {
        Self {
            bundle,
            top_k: None,
            min_confidence: default_min_confidence(),
        }
    }
}

/// The cacheable part of an analysis: everything except the caller-local
/// total latency and cache provenance
#[derive(Debug)]
pub struct AnalysisOutcome {
    /// Structured status code
    pub status: AnalyzeStatus,
    /// Ranked matches
    pub matches: Vec<MatchResult>,
    /// Modalities that contributed to the content embedding
    pub used_modalities: Vec<Modality>,
    /// Images skipped due to decode/encode failure
    pub skipped_images: usize,
    /// Per-stage timings of the run that produced this outcome
    pub timings: StageTimings,
    /// True when every stage ran, possibly with degraded inputs. Transient
    /// outcomes like a not-yet-loaded index or a stage failure stay false
    /// so they never outlive the condition through the cache.
    pub completed: bool,
}

/// Full analysis response envelope
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResponse {
    /// Source identifier echoed from the request
    pub source: String,
    /// Content fingerprint (dedup/cache key basis)
    pub fingerprint: String,
    /// Structured status code
    pub status: AnalyzeStatus,
    /// Ranked matches (empty unless status is SUCCESS or PARTIAL)
    pub matches: Vec<MatchResult>,
    /// Modalities that contributed
    pub used_modalities: Vec<Modality>,
    /// Images skipped due to decode/encode failure
    pub skipped_images: usize,
    /// Per-stage latency breakdown
    pub performance: StageTimings,
    /// True when served from the result cache
    pub cached: bool,
}

// ============================================================================
// PIPELINE
// ============================================================================

type InFlightRx = watch::Receiver<Option<Arc<AnalysisOutcome>>>;

/// The analysis pipeline: encoder stage, fusion layer, category index,
/// matcher, cache, and telemetry behind one `analyze` entry point
pub struct Pipeline {
    encoders: ModalityEncoders,
    fusion: FusionLayer,
    index: CategoryIndex,
    matcher: Matcher,
    cache: Box<dyn ResultCache>,
    telemetry: TelemetryRecorder,
    config: PipelineConfig,
    in_flight: Mutex<HashMap<String, InFlightRx>>,
}

impl Pipeline {
    /// Assemble a pipeline from its stages.
    ///
    /// Must run inside a Tokio runtime when coalescing is enabled.
    pub fn new(
        encoders: ModalityEncoders,
        fusion: FusionLayer,
        index: CategoryIndex,
        config: PipelineConfig,
    ) -> Arc<Self> {
        let encoders = match config.coalescing_window {
            Some(window) => encoders.with_coalescing(window, config.coalescing_max_batch),
            None => encoders,
        };

        Arc::new(Self {
            encoders,
            fusion,
            index,
            matcher: Matcher::new(config.rank_decay),
            cache: Box::new(MemoryCache::new(config.cache_capacity)),
            telemetry: TelemetryRecorder::default(),
            config,
            in_flight: Mutex::new(HashMap::new()),
        })
    }

    /// Ephemeral pipeline with the default deterministic encoders
    pub fn in_memory(config: PipelineConfig) -> Arc<Self> {
        Self::new(
            ModalityEncoders::with_defaults(),
            FusionLayer::default(),
            CategoryIndex::in_memory(EMBEDDING_DIMENSIONS),
            config,
        )
    }

    /// Pipeline backed by the durable category index.
    /// `data_dir = None` resolves to the platform data directory.
    pub fn open(data_dir: Option<std::path::PathBuf>, config: PipelineConfig) -> Result<Arc<Self>> {
        let index = CategoryIndex::open(data_dir, EMBEDDING_DIMENSIONS)?;
        Ok(Self::new(
            ModalityEncoders::with_defaults(),
            FusionLayer::default(),
            index,
            config,
        ))
    }

    /// The category index
    pub fn index(&self) -> &CategoryIndex {
        &self.index
    }

    /// The latency recorder
    pub fn telemetry(&self) -> &TelemetryRecorder {
        &self.telemetry
    }

    /// The pipeline configuration
    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    // ------------------------------------------------------------------
    // Request path
    // ------------------------------------------------------------------

    /// Analyze one content bundle. Infallible: validation failures,
    /// deadline expiry, and stage failures all map to a structured status.
    pub async fn analyze(self: &Arc<Self>, request: AnalyzeRequest) -> AnalyzeResponse {
        let started = Instant::now();
        let source = request.bundle.source.clone();

        let top_k = request.top_k.unwrap_or(self.config.default_top_k);
        if top_k == 0 || top_k > self.config.top_k_limit {
            return self.invalid(
                source,
                format!("topK must be in 1..={}, got {top_k}", self.config.top_k_limit),
                started,
            );
        }
        if !(0.0..=1.0).contains(&request.min_confidence) {
            return self.invalid(
                source,
                format!(
                    "minConfidence must be in 0.0..=1.0, got {}",
                    request.min_confidence
                ),
                started,
            );
        }

        let keywords = bundle_keywords(&request.bundle, CONTENT_KEYWORDS);
        let content_key = fingerprint(&request.bundle);
        let extraction_ms = ms(started.elapsed());
        self.telemetry.record("extraction", extraction_ms);

        // Result identity includes the ranking parameters.
        let cache_key = format!(
            "{content_key}:{top_k}:{:.4}",
            request.min_confidence
        );

        if let Some(outcome) = self.cache.get(&cache_key) {
            return self.respond(source, content_key, &outcome, true, started);
        }

        let mut rx = self.join_or_spawn(
            cache_key,
            request.bundle,
            keywords,
            top_k,
            request.min_confidence,
            extraction_ms,
        );

        let remaining = self.config.total_budget.saturating_sub(started.elapsed());
        let outcome = match tokio::time::timeout(remaining, rx.wait_for(|v| v.is_some())).await {
            Ok(Ok(value)) => value.clone(),
            // Deadline expired or the worker vanished; the detached task
            // still finishes and populates the cache for the next caller.
            Ok(Err(_)) | Err(_) => None,
        };

        match outcome {
            Some(outcome) => self.respond(source, content_key, &outcome, false, started),
            None => {
                tracing::warn!(
                    source = %source,
                    budget_ms = self.config.total_budget.as_millis() as u64,
                    "analysis deadline expired"
                );
                self.respond(
                    source,
                    content_key,
                    &Arc::new(AnalysisOutcome {
                        status: AnalyzeStatus::Timeout,
                        matches: Vec::new(),
                        used_modalities: Vec::new(),
                        skipped_images: 0,
                        timings: StageTimings {
                            extraction_ms,
                            ..StageTimings::default()
                        },
                        completed: false,
                    }),
                    false,
                    started,
                )
            }
        }
    }

    /// Analyze several bundles, at most `batch_concurrency` at a time.
    /// Responses come back in request order; each entry carries its own
    /// status, so one bad bundle never fails the batch.
    pub async fn analyze_batch(
        self: &Arc<Self>,
        requests: Vec<AnalyzeRequest>,
    ) -> Vec<AnalyzeResponse> {
        let semaphore = Arc::new(tokio::sync::Semaphore::new(
            self.config.batch_concurrency.max(1),
        ));

        let mut handles = Vec::with_capacity(requests.len());
        for request in requests {
            let source = request.bundle.source.clone();
            let pipeline = self.clone();
            let semaphore = semaphore.clone();
            handles.push((
                source,
                tokio::spawn(async move {
                    // acquire only fails on a closed semaphore; this one
                    // lives as long as the batch.
                    let _permit = semaphore.acquire_owned().await;
                    pipeline.analyze(request).await
                }),
            ));
        }

        let mut responses = Vec::with_capacity(handles.len());
        for (source, handle) in handles {
            match handle.await {
                Ok(response) => responses.push(response),
                Err(e) => {
                    tracing::error!(source = %source, error = %e, "batch analysis task failed");
                    responses.push(AnalyzeResponse {
                        source,
                        fingerprint: String::new(),
                        status: AnalyzeStatus::Partial {
                            reason: "analysis task failed".to_string(),
                        },
                        matches: Vec::new(),
                        used_modalities: Vec::new(),
                        skipped_images: 0,
                        performance: StageTimings::default(),
                        cached: false,
                    });
                }
            }
        }
        responses
    }

    /// Join an identical in-flight analysis, or become its leader. The
    /// leader runs detached so an abandoning caller cannot cancel work
    /// other callers are waiting on.
    fn join_or_spawn(
        self: &Arc<Self>,
        key: String,
        bundle: ContentBundle,
        keywords: Vec<String>,
        top_k: usize,
        min_confidence: f32,
        extraction_ms: f64,
    ) -> InFlightRx {
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(rx) = in_flight.get(&key) {
            tracing::debug!(fingerprint = %key, "joined in-flight analysis");
            return rx.clone();
        }

        let (tx, rx) = watch::channel(None);
        in_flight.insert(key.clone(), rx.clone());
        drop(in_flight);

        let pipeline = self.clone();
        tokio::spawn(async move {
            let outcome = pipeline
                .run_stages(bundle, keywords, top_k, min_confidence, extraction_ms)
                .await;

            // Only completed outcomes are cacheable; a not-ready index or
            // a failed stage must not outlive its condition.
            if outcome.completed {
                pipeline
                    .cache
                    .set(&key, outcome.clone(), pipeline.config.cache_ttl);
            }
            pipeline
                .in_flight
                .lock()
                .unwrap_or_else(|poisoned| poisoned.into_inner())
                .remove(&key);
            let _ = tx.send(Some(outcome));
        });

        rx
    }

    /// The compute stages: encode, fuse, search, rank. Every failure maps
    /// to a status; this function never errors.
    async fn run_stages(
        &self,
        bundle: ContentBundle,
        keywords: Vec<String>,
        top_k: usize,
        min_confidence: f32,
        extraction_ms: f64,
    ) -> Arc<AnalysisOutcome> {
        let mut timings = StageTimings {
            extraction_ms,
            ..StageTimings::default()
        };

        let embed_start = Instant::now();
        let encoded = match self.encoders.encode(&bundle).await {
            Ok(encoded) => encoded,
            Err(e) => {
                tracing::error!(source = %bundle.source, error = %e, "encoder stage failed");
                timings.embedding_ms = ms(embed_start.elapsed());
                return Arc::new(AnalysisOutcome {
                    status: AnalyzeStatus::Partial {
                        reason: format!("embedding failed: {e}"),
                    },
                    matches: Vec::new(),
                    used_modalities: Vec::new(),
                    skipped_images: 0,
                    timings,
                    completed: false,
                });
            }
        };

        let fused = match self.fusion.fuse(&encoded.text, &encoded.image) {
            Ok(fused) => fused,
            Err(e) => {
                tracing::error!(source = %bundle.source, error = %e, "fusion stage failed");
                timings.embedding_ms = ms(embed_start.elapsed());
                return Arc::new(AnalysisOutcome {
                    status: AnalyzeStatus::Partial {
                        reason: format!("fusion failed: {e}"),
                    },
                    matches: Vec::new(),
                    used_modalities: Vec::new(),
                    skipped_images: encoded.skipped_images,
                    timings,
                    completed: false,
                });
            }
        };
        timings.embedding_ms = ms(embed_start.elapsed());
        self.telemetry.record("embedding", timings.embedding_ms);

        let search_start = Instant::now();
        let ranked = self
            .matcher
            .rank(&self.index, &fused, &keywords, top_k, min_confidence);
        timings.search_ms = ms(search_start.elapsed());
        self.telemetry.record("search", timings.search_ms);

        let matches = match ranked {
            Ok(matches) => matches,
            Err(IndexError::NotReady) => {
                return Arc::new(AnalysisOutcome {
                    status: AnalyzeStatus::IndexNotReady,
                    matches: Vec::new(),
                    used_modalities: fused.used_modalities,
                    skipped_images: encoded.skipped_images,
                    timings,
                    completed: false,
                });
            }
            Err(e) => {
                tracing::error!(source = %bundle.source, error = %e, "search stage failed");
                return Arc::new(AnalysisOutcome {
                    status: AnalyzeStatus::Partial {
                        reason: format!("search failed: {e}"),
                    },
                    matches: Vec::new(),
                    used_modalities: fused.used_modalities,
                    skipped_images: encoded.skipped_images,
                    timings,
                    completed: false,
                });
            }
        };

        let mut degraded = Vec::new();
        if encoded.skipped_images > 0 {
            degraded.push(format!("{} images skipped", encoded.skipped_images));
        }
        if bundle.layout.partial {
            degraded.push("content extraction truncated".to_string());
        }

        let status = if degraded.is_empty() {
            AnalyzeStatus::Success
        } else {
            AnalyzeStatus::Partial {
                reason: degraded.join("; "),
            }
        };

        Arc::new(AnalysisOutcome {
            status,
            matches,
            used_modalities: fused.used_modalities,
            skipped_images: encoded.skipped_images,
            timings,
            completed: true,
        })
    }

    fn respond(
        &self,
        source: String,
        fingerprint: String,
        outcome: &Arc<AnalysisOutcome>,
        cached: bool,
        started: Instant,
    ) -> AnalyzeResponse {
        let total_ms = ms(started.elapsed());
        self.telemetry.record("total", total_ms);

        let mut performance = outcome.timings.clone();
        performance.total_ms = total_ms;

        AnalyzeResponse {
            source,
            fingerprint,
            status: outcome.status.clone(),
            matches: outcome.matches.clone(),
            used_modalities: outcome.used_modalities.clone(),
            skipped_images: outcome.skipped_images,
            performance,
            cached,
        }
    }

    fn invalid(&self, source: String, reason: String, started: Instant) -> AnalyzeResponse {
        let total_ms = ms(started.elapsed());
        AnalyzeResponse {
            source,
            fingerprint: String::new(),
            status: AnalyzeStatus::InvalidInput { reason },
            matches: Vec::new(),
            used_modalities: Vec::new(),
            skipped_images: 0,
            performance: StageTimings {
                total_ms,
                ..StageTimings::default()
            },
            cached: false,
        }
    }

    // ------------------------------------------------------------------
    // Control plane: taxonomy loading
    // ------------------------------------------------------------------

    /// Load a taxonomy snapshot file, replacing the index.
    /// Returns the number of categories loaded.
    pub fn load_taxonomy_snapshot(&self, path: &Path) -> Result<usize> {
        let entries = read_taxonomy_snapshot(path)?;
        self.load_entries(entries)
    }

    /// Embed and load taxonomy entries, replacing the index
    pub fn load_entries(&self, entries: Vec<TaxonomyEntry>) -> Result<usize> {
        let documents: Vec<String> = entries.iter().map(category_document).collect();
        let vectors = self.encoders.encode_documents(&documents)?;

        let mut records = Vec::with_capacity(entries.len());
        for (entry, vector) in entries.into_iter().zip(vectors) {
            records.push(self.category_record(entry, vector)?);
        }

        let count = self.index.bulk_load(records)?;
        tracing::info!(categories = count, "taxonomy snapshot loaded");
        Ok(count)
    }

    /// Embed and insert one category; visible to the next query
    pub fn insert_category(&self, entry: TaxonomyEntry) -> Result<()> {
        let document = category_document(&entry);
        let vectors = self.encoders.encode_documents(&[document])?;
        let Some(vector) = vectors.into_iter().next() else {
            return Err(PipelineError::Encode(EncodeError::Failed(
                "no embedding generated for category".into(),
            )));
        };
        let record = self.category_record(entry, vector)?;
        self.index.insert(record)?;
        Ok(())
    }

    /// Category embeddings go through the same fusion layer as queries so
    /// the two stay comparable.
    fn category_record(
        &self,
        entry: TaxonomyEntry,
        vector: Vec<f32>,
    ) -> Result<CategoryRecord> {
        let text = ChannelVector {
            vector,
            tag: ChannelTag::Text,
        };
        let image = ChannelVector::absent(self.encoders.image_dimensions(), ChannelTag::NoImage);
        let fused = self.fusion.fuse(&text, &image)?;

        let document = category_document(&entry);
        let mut keywords: Vec<String> =
            entry.keywords.iter().map(|k| k.to_lowercase()).collect();
        keywords.extend(extract_keywords(&document, CATEGORY_KEYWORDS));
        keywords.sort();
        keywords.dedup();

        Ok(CategoryRecord {
            id: entry.id,
            name: entry.name,
            description: entry.description,
            source: entry.source,
            embedding: fused.embedding,
            keywords,
            parent_id: entry.parent_id,
            level: entry.level,
        })
    }
}

fn ms(elapsed: Duration) -> f64 {
    elapsed.as_secs_f64() * 1000.0
}

// ============================================================================
// TESTS
// ============================================================================
