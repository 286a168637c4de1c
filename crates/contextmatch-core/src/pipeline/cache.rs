//! Result Cache
//!
//! Short-TTL cache keyed by content fingerprint. Identical content
//! resubmitted within the TTL is answered without re-running the pipeline.

use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use lru::LruCache;

use super::AnalysisOutcome;

/// Capability: cache analysis outcomes by fingerprint
pub trait ResultCache: Send + Sync {
    /// Fetch a live entry, or None on miss/expiry
    fn get(&self, key: &str) -> Option<Arc<AnalysisOutcome>>;

    /// Store an entry with its time-to-live
    fn set(&self, key: &str, value: Arc<AnalysisOutcome>, ttl: Duration);
}

/// In-process LRU cache with per-entry TTL
pub struct MemoryCache {
    entries: Mutex<LruCache<String, (Instant, Arc<AnalysisOutcome>)>>,
}

impl MemoryCache {
    /// Create a cache holding at most `capacity` entries
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            entries: Mutex::new(LruCache::new(capacity)),
        }
    }
}

impl ResultCache for MemoryCache {
    fn get(&self, key: &str) -> Option<Arc<AnalysisOutcome>> {
        let mut entries = self.entries.lock().ok()?;
        match entries.get(key) {
            Some((expires, value)) if *expires > Instant::now() => Some(value.clone()),
            Some(_) => {
                entries.pop(key);
                None
            }
            None => None,
        }
    }

    fn set(&self, key: &str, value: Arc<AnalysisOutcome>, ttl: Duration) {
        if let Ok(mut entries) = self.entries.lock() {
            entries.put(key.to_string(), (Instant::now() + ttl, value));
        }
    }
}
