//! The indexer send loop: batch documents, deliver them, report outcomes.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::batch::Batch;
use crate::messenger::IndexerMessenger;
use docflow_repository::Destination;
use docflow_shared::{Document, EventType};

/// Event message for delivered documents.
pub const SUCCEEDED: &str = "SUCCEEDED";

/// Running totals used for the periodic status line.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct IndexerMetrics {
    pub batches: u64,
    pub indexed: u64,
    pub failed: u64,
    pub send_time: Duration,
}

impl IndexerMetrics {
    fn record(&mut self, size: usize, succeeded: bool, elapsed: Duration) {
        self.batches += 1;
        if succeeded {
            self.indexed += size as u64;
        } else {
            self.failed += size as u64;
        }
        self.send_time += elapsed;
    }

    /// Mean delivery time per document in milliseconds.
    pub fn mean_ms_per_doc(&self) -> f64 {
        let docs = self.indexed + self.failed;
        if docs == 0 {
            0.0
        } else {
            self.send_time.as_secs_f64() * 1000.0 / docs as f64
        }
    }
}

/// Consumes documents to index and delivers them to a destination in batches.
pub struct Indexer {
    messenger: Arc<dyn IndexerMessenger>,
    destination: Arc<dyn Destination>,
    batch: Box<dyn Batch>,
    cancel: CancellationToken,
    log_interval: Duration,
    metrics: IndexerMetrics,
}

impl Indexer {
    pub fn new(
        messenger: Arc<dyn IndexerMessenger>,
        destination: Arc<dyn Destination>,
        batch: Box<dyn Batch>,
        cancel: CancellationToken,
        log_interval: Duration,
    ) -> Self {
        Self {
            messenger,
            destination,
            batch,
            cancel,
            log_interval,
            metrics: IndexerMetrics::default(),
        }
    }

    pub fn metrics(&self) -> IndexerMetrics {
        self.metrics
    }

    /// Run until cancelled, then deliver whatever is still batched.
    #[instrument(skip(self))]
    pub async fn run(mut self) -> IndexerMetrics {
        info!("Indexer started");
        let mut last_log = Instant::now();

        while !self.cancel.is_cancelled() {
            let ready = match self.messenger.poll_doc_to_index().await {
                Ok(Some(doc)) => self.batch.add(doc),
                Ok(None) => self.batch.flush_if_expired(),
                Err(e) => {
                    warn!(error = %e, "Failed to poll for documents to index");
                    self.batch.flush_if_expired()
                }
            };

            if !ready.is_empty() {
                self.send_to_index(ready).await;
            }

            if last_log.elapsed() >= self.log_interval {
                self.log_status();
                last_log = Instant::now();
            }
        }

        let remaining = self.batch.flush();
        if !remaining.is_empty() {
            self.send_to_index(remaining).await;
        }

        if let Err(e) = self.messenger.close().await {
            warn!(error = %e, "Failed to close messenger");
        }
        if let Err(e) = self.destination.close().await {
            warn!(error = %e, "Failed to close destination");
        }
        self.log_status();
        info!("Indexer stopped");
        self.metrics
    }

    /// Deliver one batch and report every document in it. Offsets are
    /// acknowledged whether or not delivery succeeded; failed documents are
    /// not retried.
    async fn send_to_index(&mut self, docs: Vec<Document>) {
        debug!(count = docs.len(), "Sending batch");
        let start = Instant::now();
        let result = self.destination.send_batch(&docs).await;
        let elapsed = start.elapsed();

        let (event_type, message) = match &result {
            Ok(()) => (EventType::Finish, SUCCEEDED.to_string()),
            Err(e) => {
                error!(count = docs.len(), error = %e, "Failed to deliver batch");
                (EventType::Fail, format!("FAILED: {}", e))
            }
        };

        for doc in &docs {
            if let Err(e) = self
                .messenger
                .send_event(doc, Some(message.clone()), event_type)
                .await
            {
                error!(doc_id = %doc.id(), error = %e, "Failed to send event");
            }
        }

        if let Err(e) = self.messenger.batch_complete(&docs).await {
            warn!(error = %e, "Failed to acknowledge batch");
        }

        self.metrics.record(docs.len(), result.is_ok(), elapsed);
    }

    fn log_status(&self) {
        info!(
            batches = self.metrics.batches,
            indexed = self.metrics.indexed,
            failed = self.metrics.failed,
            mean_ms_per_doc = format!("{:.3}", self.metrics.mean_ms_per_doc()),
            "Indexer status"
        );
    }
}
