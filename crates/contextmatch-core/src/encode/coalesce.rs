//! Coalescing Text Encoder
//!
//! Batches text encode requests that arrive within a short window into one
//! `encode_batch` pass, trading a few milliseconds of added latency for
//! hardware throughput. A caller abandoning its request (deadline expiry)
//! does not abort the batch; the remaining requests still complete.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};

use super::{EncodeError, Result, TextEncoder};

struct Job {
    text: String,
    reply: oneshot::Sender<Result<Vec<f32>>>,
}

/// Handle to a background coalescing worker wrapping a [`TextEncoder`].
///
/// Must be created inside a Tokio runtime.
#[derive(Clone)]
pub struct CoalescingEncoder {
    tx: mpsc::UnboundedSender<Job>,
}

impl CoalescingEncoder {
    /// Spawn the coalescing worker. Requests arriving within `window` of
    /// the first pending request are merged into one batch of at most
    /// `max_batch` inputs.
    pub fn spawn(inner: Arc<dyn TextEncoder>, window: Duration, max_batch: usize) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        tokio::spawn(worker(inner, rx, window, max_batch.max(1)));
        Self { tx }
    }

    /// Encode one text, possibly batched with concurrent requests
    pub async fn encode(&self, text: &str) -> Result<Vec<f32>> {
        let (reply, response) = oneshot::channel();
        self.tx
            .send(Job {
                text: text.to_string(),
                reply,
            })
            .map_err(|_| EncodeError::Unavailable("coalescing worker stopped".into()))?;

        response
            .await
            .map_err(|_| EncodeError::Failed("coalescing worker dropped request".into()))?
    }
}

async fn worker(
    inner: Arc<dyn TextEncoder>,
    mut rx: mpsc::UnboundedReceiver<Job>,
    window: Duration,
    max_batch: usize,
) {
    while let Some(first) = rx.recv().await {
        let mut jobs = vec![first];

        // Collect whatever else arrives inside the coalescing window.
        let deadline = tokio::time::Instant::now() + window;
        while jobs.len() < max_batch {
            match tokio::time::timeout_at(deadline, rx.recv()).await {
                Ok(Some(job)) => jobs.push(job),
                Ok(None) | Err(_) => break,
            }
        }

        let texts: Vec<String> = jobs.iter().map(|j| j.text.clone()).collect();
        let encoder = inner.clone();
        let batch = tokio::task::spawn_blocking(move || encoder.encode_batch(&texts)).await;

        let outcome = match batch {
            Ok(result) => result,
            Err(e) => Err(EncodeError::Failed(format!("batch task aborted: {e}"))),
        };

        tracing::debug!(
            batch_size = jobs.len(),
            ok = outcome.is_ok(),
            "coalesced encode batch completed"
        );

        match outcome {
            Ok(vectors) if vectors.len() == jobs.len() => {
                for (job, vector) in jobs.into_iter().zip(vectors) {
                    // Receiver may have timed out; dropped replies are fine.
                    let _ = job.reply.send(Ok(vector));
                }
            }
            Ok(vectors) => {
                let err = EncodeError::Failed(format!(
                    "batch returned {} vectors for {} inputs",
                    vectors.len(),
                    jobs.len()
                ));
                for job in jobs {
                    let _ = job.reply.send(Err(err.clone()));
                }
            }
            Err(err) => {
                for job in jobs {
                    let _ = job.reply.send(Err(err.clone()));
                }
            }
        }
    }
}
