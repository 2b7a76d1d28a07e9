//! Transport between the publisher, the workers and the indexer.
//!
//! Each component sees only the narrow view it needs:
//!
//! - [`PublisherMessenger`]: submit documents, consume lifecycle events
//! - [`WorkerMessenger`]: consume documents to process, hand off documents to index, emit events
//! - [`IndexerMessenger`]: consume documents to index, emit events, acknowledge batches
//!
//! Polls are bounded waits; `Ok(None)` means nothing arrived in time and is
//! not an error.

mod local;

#[cfg(feature = "kafka")]
mod kafka;

use async_trait::async_trait;

use crate::errors::MessengerError;
use docflow_shared::{Document, Event, EventType};

pub use local::{LocalMessenger, DEFAULT_POLL_TIMEOUT, DEFAULT_QUEUE_CAPACITY};

#[cfg(feature = "kafka")]
pub use kafka::{
    KafkaIndexerMessenger, KafkaPublisherMessenger, KafkaTopics, KafkaWorkerMessenger,
};

/// The publisher's view of the transport.
#[async_trait]
pub trait PublisherMessenger: Send + Sync {
    /// Submit a document to the documents-to-process channel. May wait for queue capacity.
    async fn send_for_processing(&self, doc: Document) -> Result<(), MessengerError>;

    /// Wait a bounded time for the next lifecycle event.
    async fn poll_event(&self) -> Result<Option<Event>, MessengerError>;

    async fn close(&self) -> Result<(), MessengerError>;
}

/// The worker's view of the transport.
#[async_trait]
pub trait WorkerMessenger: Send + Sync {
    /// Wait a bounded time for the next document to process.
    async fn poll_doc_to_process(&self) -> Result<Option<Document>, MessengerError>;

    async fn send_for_indexing(&self, doc: Document) -> Result<(), MessengerError>;

    async fn send_event(
        &self,
        doc: &Document,
        message: Option<String>,
        event_type: EventType,
    ) -> Result<(), MessengerError>;

    /// Route a document to the dead-letter channel.
    async fn send_failed(&self, doc: Document) -> Result<(), MessengerError>;

    /// Acknowledge every document received so far.
    async fn commit_pending_doc_offsets(&self) -> Result<(), MessengerError>;

    async fn close(&self) -> Result<(), MessengerError>;
}

/// The indexer's view of the transport.
#[async_trait]
pub trait IndexerMessenger: Send + Sync {
    /// Wait a bounded time for the next document to index.
    async fn poll_doc_to_index(&self) -> Result<Option<Document>, MessengerError>;

    async fn send_event(
        &self,
        doc: &Document,
        message: Option<String>,
        event_type: EventType,
    ) -> Result<(), MessengerError>;

    /// Acknowledge a delivered (or failed) batch.
    async fn batch_complete(&self, batch: &[Document]) -> Result<(), MessengerError>;

    async fn close(&self) -> Result<(), MessengerError>;
}
