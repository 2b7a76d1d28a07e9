//! Retry accounting for documents that keep coming back.
//!
//! A document is only delivered to a worker again when a previous attempt
//! never committed, e.g. because the process died mid-document. The counter
//! lets a worker recognise such a document and divert it to the dead-letter
//! channel instead of processing it forever.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tracing::warn;

use docflow_shared::Document;

/// Tracks how many times each document has been received.
///
/// Implementations backed by an external coordination service can share the
/// count between processes; [`InMemoryRetryCounter`] is enough for a single
/// process.
#[async_trait]
pub trait RetryCounter: Send + Sync {
    /// Record one more delivery of `doc`. Returns `true` once the number of
    /// retries exceeds the configured maximum.
    async fn add(&self, doc: &Document) -> bool;

    /// Forget `doc` after it has been handled.
    async fn remove(&self, doc: &Document);
}

/// Counter key: the same id in different runs is a different document.
fn counter_key(doc: &Document) -> String {
    format!("{}/{}", doc.run_id().unwrap_or_default(), doc.id())
}

/// Process-local retry counter.
#[derive(Debug)]
pub struct InMemoryRetryCounter {
    max_retries: u32,
    deliveries: Mutex<HashMap<String, u32>>,
}

impl InMemoryRetryCounter {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            deliveries: Mutex::new(HashMap::new()),
        }
    }

    /// Number of documents currently tracked.
    pub fn len(&self) -> usize {
        self.deliveries.lock().map(|d| d.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait]
impl RetryCounter for InMemoryRetryCounter {
    async fn add(&self, doc: &Document) -> bool {
        let mut deliveries = match self.deliveries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };

        let count = deliveries.entry(counter_key(doc)).or_insert(0);
        *count += 1;

        let retries = *count - 1;
        if retries > self.max_retries {
            warn!(doc_id = %doc.id(), retries, max_retries = self.max_retries, "Retry limit exceeded");
            return true;
        }
        false
    }

    async fn remove(&self, doc: &Document) {
        let mut deliveries = match self.deliveries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        deliveries.remove(&counter_key(doc));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_exceeds_after_max_retries() {
        let counter = InMemoryRetryCounter::new(2);
        let doc = Document::with_run_id("doc1", "run1");

        assert!(!counter.add(&doc).await);
        assert!(!counter.add(&doc).await);
        assert!(!counter.add(&doc).await);
        assert!(counter.add(&doc).await);
    }

    #[tokio::test]
    async fn test_remove_resets_count() {
        let counter = InMemoryRetryCounter::new(0);
        let doc = Document::new("doc1");

        assert!(!counter.add(&doc).await);
        counter.remove(&doc).await;
        assert!(counter.is_empty());
        assert!(!counter.add(&doc).await);
    }

    #[tokio::test]
    async fn test_runs_are_counted_separately() {
        let counter = InMemoryRetryCounter::new(0);

        assert!(!counter.add(&Document::with_run_id("doc1", "run1")).await);
        assert!(!counter.add(&Document::with_run_id("doc1", "run2")).await);
        assert_eq!(counter.len(), 2);
    }
}
