//! Telemetry
//!
//! In-process latency recorder: a bounded ring of per-operation samples
//! with percentile summaries. Recording is a lock plus a push; queries
//! are allowed to be slower than writes.

use std::collections::VecDeque;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use serde::Serialize;

/// Default sample capacity per recorder
pub const DEFAULT_SAMPLE_CAPACITY: usize = 4096;

/// One recorded latency sample
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerformanceSample {
    /// Operation label ("extraction", "embedding", "search", "total")
    pub operation: String,
    /// Observed latency in milliseconds
    pub latency_ms: f64,
    /// When the sample was recorded
    pub timestamp: DateTime<Utc>,
}

/// Aggregated statistics for one operation
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationSummary {
    /// Operation label
    pub operation: String,
    /// Number of samples in the window
    pub count: usize,
    /// Mean latency
    pub avg_ms: f64,
    /// Median latency
    pub p50_ms: f64,
    /// 95th percentile latency
    pub p95_ms: f64,
    /// 99th percentile latency
    pub p99_ms: f64,
    /// Worst observed latency
    pub max_ms: f64,
}

/// Bounded ring of latency samples with on-demand summaries
pub struct TelemetryRecorder {
    samples: Mutex<VecDeque<PerformanceSample>>,
    capacity: usize,
}

impl Default for TelemetryRecorder {
    fn default() -> Self {
        Self::new(DEFAULT_SAMPLE_CAPACITY)
    }
}

impl TelemetryRecorder {
    /// Create a recorder keeping at most `capacity` recent samples
    pub fn new(capacity: usize) -> Self {
        Self {
            samples: Mutex::new(VecDeque::with_capacity(capacity.max(1))),
            capacity: capacity.max(1),
        }
    }

    /// Record one latency sample, evicting the oldest past capacity
    pub fn record(&self, operation: &str, latency_ms: f64) {
        let Ok(mut samples) = self.samples.lock() else {
            return;
        };
        if samples.len() == self.capacity {
            samples.pop_front();
        }
        samples.push_back(PerformanceSample {
            operation: operation.to_string(),
            latency_ms,
            timestamp: Utc::now(),
        });
    }

    /// Number of samples recorded for one operation
    pub fn count(&self, operation: &str) -> usize {
        self.samples
            .lock()
            .map(|s| s.iter().filter(|x| x.operation == operation).count())
            .unwrap_or(0)
    }

    /// Per-operation summaries, sorted by operation label
    pub fn summary(&self) -> Vec<OperationSummary> {
        let Ok(samples) = self.samples.lock() else {
            return Vec::new();
        };

        let mut by_op: std::collections::BTreeMap<&str, Vec<f64>> =
            std::collections::BTreeMap::new();
        for sample in samples.iter() {
            by_op
                .entry(sample.operation.as_str())
                .or_default()
                .push(sample.latency_ms);
        }

        by_op
            .into_iter()
            .map(|(operation, mut values)| {
                values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
                let count = values.len();
                let sum: f64 = values.iter().sum();
                OperationSummary {
                    operation: operation.to_string(),
                    count,
                    avg_ms: sum / count as f64,
                    p50_ms: percentile(&values, 0.50),
                    p95_ms: percentile(&values, 0.95),
                    p99_ms: percentile(&values, 0.99),
                    max_ms: values[count - 1],
                }
            })
            .collect()
    }
}

/// Nearest-rank percentile over a sorted slice
fn percentile(sorted: &[f64], q: f64) -> f64 {
    if sorted.is_empty() {
        return 0.0;
    }
    let rank = ((q * sorted.len() as f64).ceil() as usize).clamp(1, sorted.len());
    sorted[rank - 1]
}
