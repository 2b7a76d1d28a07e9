//! The publisher: entry point for documents and judge of run completion.
//!
//! Connectors call [`Publisher::publish`]; the runner calls
//! [`Publisher::wait_for_completion`], which consumes lifecycle events and
//! reconciles them against the documents still in flight. Only the ids of
//! unresolved documents (and of children that finished before their CREATE
//! arrived) are remembered, so memory is bounded by in-flight work.

mod task;
mod tracker;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{watch, Mutex, Notify};
use tracing::{debug, info, warn};

use crate::errors::{MessengerError, PublisherError};
use crate::messenger::PublisherMessenger;
use docflow_shared::{Document, Event, EventType};

pub use task::ConnectorTask;
pub use tracker::{CompletionTracker, TrackerCounts};

/// How often a publisher blocked on `max_pending_docs` re-checks the count
/// even without a wake-up.
const CAPACITY_RECHECK_INTERVAL: Duration = Duration::from_secs(10);

/// Default interval between status lines while waiting for completion.
pub const DEFAULT_LOG_INTERVAL: Duration = Duration::from_secs(30);

/// Publisher settings.
#[derive(Debug, Clone)]
pub struct PublisherConfig {
    /// Block `publish` while this many documents are pending.
    pub max_pending_docs: Option<usize>,
    /// Merge consecutive documents that share an id.
    pub collapse: bool,
    pub log_interval: Duration,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            max_pending_docs: None,
            collapse: false,
            log_interval: DEFAULT_LOG_INTERVAL,
        }
    }
}

/// Counts describing a publisher's run so far.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub publish_calls: u64,
    pub published: u64,
    pub created: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub dropped: u64,
    pub pending: usize,
}

/// Accepts documents for one run and tracks them until every one of them,
/// and every child they spawn, has reached a terminal outcome.
///
/// Shared between the connector task (publishing) and the runner (waiting),
/// typically behind an `Arc`.
pub struct Publisher {
    messenger: Arc<dyn PublisherMessenger>,
    run_id: String,
    pipeline_name: String,
    config: PublisherConfig,
    tracker: CompletionTracker,
    publish_calls: AtomicU64,
    published: AtomicU64,
    paused: watch::Sender<bool>,
    capacity_freed: Notify,
    previous: Mutex<Option<Document>>,
}

impl Publisher {
    pub fn new(
        messenger: Arc<dyn PublisherMessenger>,
        run_id: impl Into<String>,
        pipeline_name: impl Into<String>,
        config: PublisherConfig,
    ) -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            messenger,
            run_id: run_id.into(),
            pipeline_name: pipeline_name.into(),
            config,
            tracker: CompletionTracker::new(),
            publish_calls: AtomicU64::new(0),
            published: AtomicU64::new(0),
            paused,
            capacity_freed: Notify::new(),
            previous: Mutex::new(None),
        }
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn pipeline_name(&self) -> &str {
        &self.pipeline_name
    }

    /// Submit a document for processing.
    ///
    /// Waits while the publisher is paused or while `max_pending_docs`
    /// documents are pending, and may also wait on the messenger's own queue
    /// capacity. In collapsing mode the document may be held back until a
    /// document with a different id (or [`flush`](Self::flush)) arrives.
    pub async fn publish(&self, doc: Document) -> Result<(), PublisherError> {
        self.publish_calls.fetch_add(1, Ordering::SeqCst);

        self.wait_while_paused().await?;
        self.wait_for_capacity().await;

        if !self.config.collapse {
            return self.send_for_processing(doc).await;
        }

        let mut previous = self.previous.lock().await;
        match previous.as_mut() {
            Some(held) if held.id() == doc.id() => {
                held.set_or_add_all(&doc);
                Ok(())
            }
            _ => match previous.replace(doc) {
                Some(ready) => self.send_for_processing(ready).await,
                None => Ok(()),
            },
        }
    }

    /// Send the document held back by collapsing, if any.
    pub async fn flush(&self) -> Result<(), PublisherError> {
        let held = self.previous.lock().await.take();
        match held {
            Some(doc) => self.send_for_processing(doc).await,
            None => Ok(()),
        }
    }

    async fn send_for_processing(&self, mut doc: Document) -> Result<(), PublisherError> {
        doc.initialize_run_id(self.run_id.clone())?;
        let id = doc.id().to_string();

        // Track before sending so a fast terminal event cannot arrive first.
        self.tracker.track(&id);
        if let Err(e) = self.messenger.send_for_processing(doc).await {
            self.tracker.untrack(&id);
            return Err(e.into());
        }

        self.published.fetch_add(1, Ordering::SeqCst);
        debug!(doc_id = %id, "Published document");
        Ok(())
    }

    async fn wait_while_paused(&self) -> Result<(), PublisherError> {
        let mut paused = self.paused.subscribe();
        paused
            .wait_for(|paused| !*paused)
            .await
            .map_err(|e| MessengerError::channel(e.to_string()))?;
        Ok(())
    }

    async fn wait_for_capacity(&self) {
        let Some(max) = self.config.max_pending_docs else {
            return;
        };

        loop {
            let freed = self.capacity_freed.notified();
            let pending = self.tracker.num_pending();
            if pending < max {
                return;
            }
            debug!(pending, max, "Waiting for pending documents to drain");
            if tokio::time::timeout(CAPACITY_RECHECK_INTERVAL, freed).await.is_err() {
                debug!("Re-checking pending count");
            }
        }
    }

    /// Block subsequent `publish` calls until [`resume`](Self::resume).
    pub fn pause(&self) -> Result<(), PublisherError> {
        let changed = self.paused.send_if_modified(|paused| {
            if *paused {
                false
            } else {
                *paused = true;
                true
            }
        });
        if changed {
            Ok(())
        } else {
            Err(PublisherError::AlreadyPaused)
        }
    }

    pub fn resume(&self) -> Result<(), PublisherError> {
        let changed = self.paused.send_if_modified(|paused| {
            if *paused {
                *paused = false;
                true
            } else {
                false
            }
        });
        if changed {
            Ok(())
        } else {
            Err(PublisherError::NotPaused)
        }
    }

    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// Reconcile one lifecycle event against the pending documents.
    pub fn handle_event(&self, event: &Event) {
        let id = event.document_id();
        debug!(event = %event, "Handling event");

        match event.event_type() {
            EventType::Create => self.tracker.record_create(id),
            terminal => {
                let resolved = self.tracker.record_terminal(id, terminal);
                if resolved && self.config.max_pending_docs.is_some() {
                    self.capacity_freed.notify_waiters();
                }
            }
        }
    }

    pub fn num_pending(&self) -> usize {
        self.tracker.num_pending()
    }

    pub fn has_pending(&self) -> bool {
        self.tracker.has_pending()
    }

    pub fn stats(&self) -> PublisherStats {
        let counts = self.tracker.counts();
        PublisherStats {
            publish_calls: self.publish_calls.load(Ordering::SeqCst),
            published: self.published.load(Ordering::SeqCst),
            created: counts.created,
            succeeded: counts.succeeded,
            failed: counts.failed,
            dropped: counts.dropped,
            pending: counts.pending,
        }
    }

    /// Consume events until the connector has finished and nothing is pending.
    ///
    /// Fails when `timeout` elapses or the connector reports an error. The
    /// last poll must have come back empty before success is declared, which
    /// assumes this publisher is the only consumer of its event channel.
    pub async fn wait_for_completion(
        &self,
        connector: &mut ConnectorTask,
        timeout: Duration,
    ) -> Result<(), PublisherError> {
        let started = Instant::now();
        let mut last_log = Instant::now();

        loop {
            let event = self.messenger.poll_event().await?;
            let received = event.is_some();
            if let Some(event) = event {
                self.handle_event(&event);
            }

            let elapsed = started.elapsed();
            if elapsed > timeout {
                let pending = self.num_pending();
                warn!(pending, elapsed = ?elapsed, "Timed out waiting for completion");
                return Err(PublisherError::Timeout { pending, elapsed });
            }

            if let Some(error) = connector.error() {
                warn!(error = %error, "Connector failed");
                return Err(PublisherError::ConnectorFailed(error));
            }

            if connector.is_finished() && !received && !self.has_pending() {
                info!(run_id = %self.run_id, stats = ?self.stats(), "Run complete");
                return Ok(());
            }

            if last_log.elapsed() >= self.config.log_interval {
                let stats = self.stats();
                info!(
                    pending = stats.pending,
                    published = stats.published,
                    succeeded = stats.succeeded,
                    failed = stats.failed,
                    dropped = stats.dropped,
                    "Waiting on {} documents",
                    stats.pending
                );
                last_log = Instant::now();
            }
        }
    }

    pub async fn close(&self) -> Result<(), PublisherError> {
        self.messenger.close().await?;
        Ok(())
    }
}
