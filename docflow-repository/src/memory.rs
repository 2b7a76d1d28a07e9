//! In-memory destination used by tests and dry runs.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::errors::DestinationError;
use crate::interfaces::Destination;
use docflow_shared::Document;

/// Destination that keeps every delivered document in memory.
#[derive(Default)]
pub struct InMemoryDestination {
    documents: Mutex<Vec<Document>>,
    batches: AtomicUsize,
    fail_batches: AtomicBool,
    healthy: AtomicBool,
}

impl InMemoryDestination {
    pub fn new() -> Self {
        Self {
            healthy: AtomicBool::new(true),
            ..Default::default()
        }
    }

    /// Make every subsequent `send_batch` fail.
    pub fn set_fail_batches(&self, fail: bool) {
        self.fail_batches.store(fail, Ordering::SeqCst);
    }

    pub fn set_healthy(&self, healthy: bool) {
        self.healthy.store(healthy, Ordering::SeqCst);
    }

    /// Documents delivered so far, in delivery order.
    pub fn documents(&self) -> Vec<Document> {
        match self.documents.lock() {
            Ok(docs) => docs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Destination for InMemoryDestination {
    async fn validate_connection(&self) -> Result<bool, DestinationError> {
        Ok(self.healthy.load(Ordering::SeqCst))
    }

    async fn send_batch(&self, documents: &[Document]) -> Result<(), DestinationError> {
        if self.fail_batches.load(Ordering::SeqCst) {
            return Err(DestinationError::bulk_index("destination configured to fail"));
        }

        let mut stored = self
            .documents
            .lock()
            .map_err(|e| DestinationError::connection(e.to_string()))?;
        stored.extend(documents.iter().cloned());
        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_send_batch_stores_documents() {
        let dest = InMemoryDestination::new();

        dest.send_batch(&[Document::new("a"), Document::new("b")])
            .await
            .unwrap();
        dest.send_batch(&[Document::new("c")]).await.unwrap();

        let ids: Vec<String> = dest.documents().iter().map(|d| d.id().to_string()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
        assert_eq!(dest.batch_count(), 2);
        assert!(dest.validate_connection().await.unwrap());
    }

    #[tokio::test]
    async fn test_failing_destination_stores_nothing() {
        let dest = InMemoryDestination::new();
        dest.set_fail_batches(true);

        let result = dest.send_batch(&[Document::new("a")]).await;

        assert!(matches!(result, Err(DestinationError::BulkIndexError(_))));
        assert!(dest.documents().is_empty());
        assert_eq!(dest.batch_count(), 0);
    }
}
