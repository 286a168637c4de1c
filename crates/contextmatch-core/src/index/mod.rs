//! Category Index
//!
//! Stores category embeddings and metadata and answers nearest-neighbor
//! queries by exhaustive dot-product scan. All stored vectors are
//! unit-normalized, so cosine similarity is a plain dot product; at the
//! target cardinality (~10K records) the flat scan stays well under the
//! 10 ms budget.
//!
//! Concurrency model: the live snapshot is an immutable `Arc` behind an
//! `RwLock`. Readers clone the `Arc` (lock held only for the pointer read)
//! and scan without any lock. Writers rebuild the snapshot outside the lock
//! and hold the write lock only for the pointer swap.
//!
//! Beyond roughly 100K records the flat scan degrades and an approximate
//! sub-linear index is required; that is an explicit scaling boundary, not
//! solved here. The seam for a replacement is the snapshot swap.

mod snapshot;
mod store;

pub use snapshot::{TaxonomyEntry, category_document, read_taxonomy_snapshot};
pub use store::CategoryStore;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, RwLock};

use crate::embedding::{Embedding, NORM_TOLERANCE, dot_product};

// ============================================================================
// CONSTANTS
// ============================================================================

/// Record count past which the flat scan is out of its design envelope
pub const FLAT_SCAN_SOFT_LIMIT: usize = 100_000;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Category index error type
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// Query arrived before any categories were loaded
    #[error("index not ready: no categories loaded")]
    NotReady,
    /// Vector dimensionality does not match the index
    #[error("invalid dimensions: expected {expected}, got {got}")]
    InvalidDimensions { expected: usize, got: usize },
    /// Stored embeddings must be unit-normalized
    #[error("embedding must be unit-normalized, got norm {0}")]
    NotNormalized(f32),
    /// Database error from the durable store
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    /// Malformed taxonomy snapshot
    #[error("snapshot error: {0}")]
    Snapshot(String),
    /// IO error
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    /// A lock was poisoned by a panicking writer
    #[error("index lock poisoned")]
    LockPoisoned,
}

/// Category index result type
pub type Result<T> = std::result::Result<T, IndexError>;

// ============================================================================
// RECORDS
// ============================================================================

/// One advertising category: taxonomy metadata plus its embedding and the
/// keyword set precomputed at load time
#[derive(Debug, Clone)]
pub struct CategoryRecord {
    /// Unique category id
    pub id: String,
    /// Human-readable name (e.g. "Automotive/Electric Vehicles")
    pub name: String,
    /// Category description
    pub description: String,
    /// Taxonomy source tag (e.g. "iab", "google")
    pub source: String,
    /// Unit-normalized category embedding
    pub embedding: Embedding,
    /// Lowercase keyword set, precomputed at load time
    pub keywords: Vec<String>,
    /// Parent category id, if any
    pub parent_id: Option<String>,
    /// Depth in the taxonomy tree (0 = root)
    pub level: u32,
}

/// Index statistics
#[derive(Debug, Clone, serde::Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IndexStats {
    /// Total number of category records
    pub total_records: usize,
    /// Embedding dimensions
    pub dimensions: usize,
    /// Approximate memory held by the vector matrix, in bytes
    pub memory_bytes: usize,
}

// ============================================================================
// SNAPSHOT
// ============================================================================

/// Immutable index generation. Vectors live in one contiguous matrix so the
/// scan is a cache-friendly sweep the compiler can vectorize.
struct IndexSnapshot {
    records: Vec<Arc<CategoryRecord>>,
    /// Row-major matrix, records.len() x dimensions
    vectors: Vec<f32>,
    by_id: HashMap<String, usize>,
}

impl IndexSnapshot {
    fn empty() -> Self {
        Self {
            records: Vec::new(),
            vectors: Vec::new(),
            by_id: HashMap::new(),
        }
    }

    fn build(records: Vec<Arc<CategoryRecord>>, dimensions: usize) -> Self {
        let mut vectors = Vec::with_capacity(records.len() * dimensions);
        let mut by_id = HashMap::with_capacity(records.len());
        for (i, record) in records.iter().enumerate() {
            vectors.extend_from_slice(&record.embedding.vector);
            by_id.insert(record.id.clone(), i);
        }
        Self {
            records,
            vectors,
            by_id,
        }
    }
}

// ============================================================================
// FLAT INDEX
// ============================================================================

/// In-memory flat-scan index over unit-normalized category embeddings
pub struct FlatIndex {
    snapshot: RwLock<Arc<IndexSnapshot>>,
    /// Serializes writers; readers never touch this
    write_lock: Mutex<()>,
    dimensions: usize,
}

impl FlatIndex {
    /// Create an empty index for vectors of the given dimensionality
    pub fn new(dimensions: usize) -> Self {
        Self {
            snapshot: RwLock::new(Arc::new(IndexSnapshot::empty())),
            write_lock: Mutex::new(()),
            dimensions,
        }
    }

    fn current(&self) -> Result<Arc<IndexSnapshot>> {
        Ok(self
            .snapshot
            .read()
            .map_err(|_| IndexError::LockPoisoned)?
            .clone())
    }

    fn swap(&self, next: Arc<IndexSnapshot>) -> Result<()> {
        *self.snapshot.write().map_err(|_| IndexError::LockPoisoned)? = next;
        Ok(())
    }

    /// Number of records in the index
    pub fn len(&self) -> usize {
        self.current().map(|s| s.records.len()).unwrap_or(0)
    }

    /// True if no records are loaded
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Embedding dimensionality
    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    /// Look up a record by id
    pub fn get(&self, id: &str) -> Option<Arc<CategoryRecord>> {
        let snapshot = self.current().ok()?;
        snapshot
            .by_id
            .get(id)
            .map(|&i| snapshot.records[i].clone())
    }

    /// True if a record with this id exists
    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    fn validate(&self, record: &CategoryRecord) -> Result<()> {
        if record.embedding.dimensions != self.dimensions {
            return Err(IndexError::InvalidDimensions {
                expected: self.dimensions,
                got: record.embedding.dimensions,
            });
        }
        let norm = record.embedding.norm();
        if (norm - 1.0).abs() > NORM_TOLERANCE * 10.0 {
            return Err(IndexError::NotNormalized(norm));
        }
        Ok(())
    }

    /// Replace the entire index with a taxonomy snapshot.
    /// Duplicate ids within the input resolve to the last occurrence.
    pub fn bulk_load(&self, records: Vec<CategoryRecord>) -> Result<usize> {
        for record in &records {
            self.validate(record)?;
        }

        let _writer = self.write_lock.lock().map_err(|_| IndexError::LockPoisoned)?;

        let mut deduped: Vec<Arc<CategoryRecord>> = Vec::with_capacity(records.len());
        let mut positions: HashMap<String, usize> = HashMap::with_capacity(records.len());
        for record in records {
            let record = Arc::new(record);
            match positions.get(&record.id) {
                Some(&i) => deduped[i] = record,
                None => {
                    positions.insert(record.id.clone(), deduped.len());
                    deduped.push(record);
                }
            }
        }

        let count = deduped.len();
        self.warn_if_crossing_soft_limit(count);
        self.swap(Arc::new(IndexSnapshot::build(deduped, self.dimensions)))?;
        Ok(count)
    }

    /// Insert (or replace) one record. The snapshot rebuild happens outside
    /// the read path; the write lock guards only the pointer swap.
    pub fn insert(&self, record: CategoryRecord) -> Result<()> {
        self.validate(&record)?;
        let record = Arc::new(record);

        let _writer = self.write_lock.lock().map_err(|_| IndexError::LockPoisoned)?;
        let current = self.current()?;

        let mut records = current.records.clone();
        match current.by_id.get(&record.id) {
            Some(&i) => records[i] = record,
            None => records.push(record),
        }

        self.warn_if_crossing_soft_limit(records.len());
        self.swap(Arc::new(IndexSnapshot::build(records, self.dimensions)))?;
        Ok(())
    }

    fn warn_if_crossing_soft_limit(&self, new_len: usize) {
        if new_len > FLAT_SCAN_SOFT_LIMIT && self.len() <= FLAT_SCAN_SOFT_LIMIT {
            tracing::warn!(
                records = new_len,
                soft_limit = FLAT_SCAN_SOFT_LIMIT,
                "category count exceeds the flat-scan design envelope; \
                 an approximate sub-linear index is required at this scale"
            );
        }
    }

    /// Return the `top_m` nearest records by dot product (== cosine for
    /// unit vectors), similarity descending, ties by id ascending.
    ///
    /// Fails fast with [`IndexError::NotReady`] on an empty index: a query
    /// before taxonomy load is a caller error, not an empty success.
    pub fn search(&self, query: &[f32], top_m: usize) -> Result<Vec<(Arc<CategoryRecord>, f32)>> {
        if query.len() != self.dimensions {
            return Err(IndexError::InvalidDimensions {
                expected: self.dimensions,
                got: query.len(),
            });
        }

        let snapshot = self.current()?;
        if snapshot.records.is_empty() {
            return Err(IndexError::NotReady);
        }

        let mut scored: Vec<(usize, f32)> = snapshot
            .vectors
            .chunks_exact(self.dimensions)
            .enumerate()
            .map(|(i, row)| (i, dot_product(query, row)))
            .collect();

        scored.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| snapshot.records[a.0].id.cmp(&snapshot.records[b.0].id))
        });
        scored.truncate(top_m);

        Ok(scored
            .into_iter()
            .map(|(i, sim)| (snapshot.records[i].clone(), sim))
            .collect())
    }

    /// Index statistics
    pub fn stats(&self) -> IndexStats {
        let snapshot = self.current().unwrap_or_else(|_| Arc::new(IndexSnapshot::empty()));
        IndexStats {
            total_records: snapshot.records.len(),
            dimensions: self.dimensions,
            memory_bytes: snapshot.vectors.len() * std::mem::size_of::<f32>(),
        }
    }

    /// Distinct source tags across all records, sorted
    pub fn sources(&self) -> Vec<String> {
        let snapshot = match self.current() {
            Ok(s) => s,
            Err(_) => return Vec::new(),
        };
        let mut sources: Vec<String> = snapshot
            .records
            .iter()
            .map(|r| r.source.clone())
            .collect();
        sources.sort();
        sources.dedup();
        sources
    }
}

// ============================================================================
// CATEGORY INDEX (flat index + durable store)
// ============================================================================

/// The category index: in-memory flat scan plus optional durable SQLite
/// store. Bulk load replaces both; incremental inserts land in memory
/// immediately and are flushed to disk off the query path.
pub struct CategoryIndex {
    flat: FlatIndex,
    store: Option<Arc<CategoryStore>>,
}

impl CategoryIndex {
    /// Ephemeral index without persistence (tests, embedded use)
    pub fn in_memory(dimensions: usize) -> Self {
        Self {
            flat: FlatIndex::new(dimensions),
            store: None,
        }
    }

    /// Open the durable index, loading any previously persisted records.
    /// `data_dir = None` resolves to the platform data directory.
    pub fn open(data_dir: Option<PathBuf>, dimensions: usize) -> Result<Self> {
        let store = CategoryStore::open(data_dir)?;
        let persisted = store.load_all(dimensions)?;
        let index = Self {
            flat: FlatIndex::new(dimensions),
            store: Some(Arc::new(store)),
        };
        if !persisted.is_empty() {
            let count = index.flat.bulk_load(persisted)?;
            tracing::info!(categories = count, "restored category index from disk");
        }
        Ok(index)
    }

    /// Replace the index with a full taxonomy snapshot, synchronously
    /// persisting it. Runs at startup, off the query path.
    pub fn bulk_load(&self, records: Vec<CategoryRecord>) -> Result<usize> {
        let count = self.flat.bulk_load(records)?;
        if let Some(store) = &self.store {
            let snapshot = self.flat.current()?;
            store.replace_all(&snapshot.records)?;
        }
        Ok(count)
    }

    /// Insert one record: the in-memory index is updated immediately and
    /// visible to the next query; the durable write is flushed
    /// asynchronously when a runtime is available.
    pub fn insert(&self, record: CategoryRecord) -> Result<()> {
        self.flat.insert(record.clone())?;

        if let Some(store) = &self.store {
            let store = store.clone();
            let record = Arc::new(record);
            match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    handle.spawn_blocking(move || {
                        if let Err(e) = store.upsert(&record) {
                            tracing::error!(id = %record.id, error = %e, "category flush failed");
                        }
                    });
                }
                // No runtime: flush inline rather than lose the write.
                Err(_) => store.upsert(&record)?,
            }
        }
        Ok(())
    }

    /// Nearest-neighbor search; see [`FlatIndex::search`]
    pub fn search(&self, query: &[f32], top_m: usize) -> Result<Vec<(Arc<CategoryRecord>, f32)>> {
        self.flat.search(query, top_m)
    }

    /// Number of records
    pub fn len(&self) -> usize {
        self.flat.len()
    }

    /// True if no records are loaded
    pub fn is_empty(&self) -> bool {
        self.flat.is_empty()
    }

    /// Look up a record by id
    pub fn get(&self, id: &str) -> Option<Arc<CategoryRecord>> {
        self.flat.get(id)
    }

    /// True if a record with this id exists
    pub fn contains(&self, id: &str) -> bool {
        self.flat.contains(id)
    }

    /// Index statistics
    pub fn stats(&self) -> IndexStats {
        self.flat.stats()
    }

    /// Distinct taxonomy source tags
    pub fn sources(&self) -> Vec<String> {
        self.flat.sources()
    }
}

// ============================================================================
// TESTS
// ============================================================================
