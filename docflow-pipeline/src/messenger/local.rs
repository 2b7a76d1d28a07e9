//! In-process messenger built on tokio channels.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::debug;

use crate::errors::MessengerError;
use crate::messenger::{IndexerMessenger, PublisherMessenger, WorkerMessenger};
use docflow_shared::{Document, Event, EventType};

/// Default capacity of the documents-to-process and documents-to-index queues.
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Default bounded wait of every poll.
pub const DEFAULT_POLL_TIMEOUT: Duration = Duration::from_millis(50);

type Shared<T> = Arc<tokio::sync::Mutex<mpsc::Receiver<T>>>;

/// Messenger for single-process runs.
///
/// The process and index queues are bounded, so a full queue makes the
/// sender wait. The event channel is unbounded. Dead letters are kept in
/// memory and offsets are not tracked, so commits are no-ops.
///
/// One instance is shared by the publisher, the whole worker pool and the
/// indexer of a run.
pub struct LocalMessenger {
    process_tx: mpsc::Sender<Document>,
    process_rx: Shared<Document>,
    index_tx: mpsc::Sender<Document>,
    index_rx: Shared<Document>,
    event_tx: mpsc::UnboundedSender<Event>,
    event_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<Event>>>,
    dead_letters: Mutex<Vec<Document>>,
    poll_timeout: Duration,
}

impl LocalMessenger {
    pub fn new(queue_capacity: usize, poll_timeout: Duration) -> Self {
        let capacity = queue_capacity.max(1);
        let (process_tx, process_rx) = mpsc::channel(capacity);
        let (index_tx, index_rx) = mpsc::channel(capacity);
        let (event_tx, event_rx) = mpsc::unbounded_channel();

        Self {
            process_tx,
            process_rx: Arc::new(tokio::sync::Mutex::new(process_rx)),
            index_tx,
            index_rx: Arc::new(tokio::sync::Mutex::new(index_rx)),
            event_tx,
            event_rx: Arc::new(tokio::sync::Mutex::new(event_rx)),
            dead_letters: Mutex::new(Vec::new()),
            poll_timeout,
        }
    }

    /// Documents routed to the dead-letter channel so far.
    pub fn dead_letters(&self) -> Vec<Document> {
        match self.dead_letters.lock() {
            Ok(docs) => docs.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn emit(
        &self,
        doc: &Document,
        message: Option<String>,
        event_type: EventType,
    ) -> Result<(), MessengerError> {
        let event = Event::new(doc, message, event_type);
        debug!(event = %event, "Sending event");
        self.event_tx
            .send(event)
            .map_err(|e| MessengerError::channel(e.to_string()))
    }

    async fn poll<T: Send>(&self, rx: &Shared<T>) -> Option<T> {
        timeout(self.poll_timeout, async { rx.lock().await.recv().await })
            .await
            .ok()
            .flatten()
    }
}

impl Default for LocalMessenger {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY, DEFAULT_POLL_TIMEOUT)
    }
}

#[async_trait]
impl PublisherMessenger for LocalMessenger {
    async fn send_for_processing(&self, doc: Document) -> Result<(), MessengerError> {
        self.process_tx
            .send(doc)
            .await
            .map_err(|e| MessengerError::channel(e.to_string()))
    }

    async fn poll_event(&self) -> Result<Option<Event>, MessengerError> {
        let event = timeout(self.poll_timeout, async {
            self.event_rx.lock().await.recv().await
        })
        .await
        .ok()
        .flatten();
        Ok(event)
    }

    async fn close(&self) -> Result<(), MessengerError> {
        Ok(())
    }
}

#[async_trait]
impl WorkerMessenger for LocalMessenger {
    async fn poll_doc_to_process(&self) -> Result<Option<Document>, MessengerError> {
        Ok(self.poll(&self.process_rx).await)
    }

    async fn send_for_indexing(&self, doc: Document) -> Result<(), MessengerError> {
        self.index_tx
            .send(doc)
            .await
            .map_err(|e| MessengerError::channel(e.to_string()))
    }

    async fn send_event(
        &self,
        doc: &Document,
        message: Option<String>,
        event_type: EventType,
    ) -> Result<(), MessengerError> {
        self.emit(doc, message, event_type)
    }

    async fn send_failed(&self, doc: Document) -> Result<(), MessengerError> {
        let mut dead_letters = self
            .dead_letters
            .lock()
            .map_err(|e| MessengerError::channel(e.to_string()))?;
        dead_letters.push(doc);
        Ok(())
    }

    async fn commit_pending_doc_offsets(&self) -> Result<(), MessengerError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), MessengerError> {
        Ok(())
    }
}

#[async_trait]
impl IndexerMessenger for LocalMessenger {
    async fn poll_doc_to_index(&self) -> Result<Option<Document>, MessengerError> {
        Ok(self.poll(&self.index_rx).await)
    }

    async fn send_event(
        &self,
        doc: &Document,
        message: Option<String>,
        event_type: EventType,
    ) -> Result<(), MessengerError> {
        self.emit(doc, message, event_type)
    }

    async fn batch_complete(&self, _batch: &[Document]) -> Result<(), MessengerError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), MessengerError> {
        Ok(())
    }
}
