//! Workers pull documents, run them through the pipeline and report what
//! happened to each result.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, instrument, warn};

use crate::errors::PipelineError;
use crate::messenger::WorkerMessenger;
use crate::pipeline::Pipeline;
use crate::retry::RetryCounter;
use docflow_shared::{Document, EventType};

/// Pause after a failed poll before polling again.
const POLL_ERROR_BACKOFF: Duration = Duration::from_millis(100);

/// Event message for documents diverted to the dead-letter channel.
pub const SENT_TO_DLQ: &str = "SENT_TO_DLQ";

/// Identity-only copy of a document, enough to address events and retry
/// entries once the document itself has been handed to the pipeline.
fn identity(doc: &Document) -> Document {
    match doc.run_id() {
        Some(run_id) => Document::with_run_id(doc.id(), run_id),
        None => Document::new(doc.id()),
    }
}

/// Announce, drop or forward every result of the pipeline for one document.
///
/// A result whose id differs from the input's is announced with CREATE
/// before anything else is said about it.
async fn process_results(
    pipeline: &mut Pipeline,
    messenger: &dyn WorkerMessenger,
    doc: Document,
) -> Result<(), PipelineError> {
    let input_id = doc.id().to_string();

    for result in pipeline.process_document(doc) {
        let result = result?;

        if result.id() != input_id {
            messenger.send_event(&result, None, EventType::Create).await?;
        }

        if result.is_dropped() {
            messenger.send_event(&result, None, EventType::Drop).await?;
        } else {
            messenger.send_for_indexing(result).await?;
        }
    }

    Ok(())
}

/// One pipeline consumer. Owns its pipeline, so stages are never shared
/// between workers.
pub struct Worker {
    id: usize,
    messenger: Arc<dyn WorkerMessenger>,
    pipeline: Pipeline,
    retry_counter: Option<Arc<dyn RetryCounter>>,
    cancel: CancellationToken,
}

impl Worker {
    pub fn new(
        id: usize,
        messenger: Arc<dyn WorkerMessenger>,
        pipeline: Pipeline,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            id,
            messenger,
            pipeline,
            retry_counter: None,
            cancel,
        }
    }

    /// Enable retry tracking.
    pub fn with_retry_counter(mut self, counter: Arc<dyn RetryCounter>) -> Self {
        self.retry_counter = Some(counter);
        self
    }

    /// Process documents until cancelled.
    ///
    /// A failing document never stops the loop. Cancellation is checked once
    /// per iteration, so a document already in the pipeline runs to the end.
    #[instrument(skip(self), fields(worker = self.id, pipeline = %self.pipeline.name()))]
    pub async fn run(mut self) {
        if let Err(e) = self.pipeline.start() {
            error!(error = %e, "Failed to start pipeline stages");
            self.shutdown().await;
            return;
        }
        info!("Worker started");

        while !self.cancel.is_cancelled() {
            let doc = match self.messenger.poll_doc_to_process().await {
                Ok(Some(doc)) => doc,
                Ok(None) => {
                    self.commit().await;
                    continue;
                }
                Err(e) => {
                    warn!(error = %e, "Failed to poll for documents");
                    tokio::time::sleep(POLL_ERROR_BACKOFF).await;
                    continue;
                }
            };

            self.handle_document(doc).await;
        }

        self.shutdown().await;
    }

    async fn handle_document(&mut self, doc: Document) {
        let marker = identity(&doc);

        if self.retry_exceeded(&doc).await {
            self.dead_letter(doc).await;
        } else {
            debug!(doc_id = %marker.id(), "Processing document");
            if let Err(e) = process_results(&mut self.pipeline, self.messenger.as_ref(), doc).await {
                error!(doc_id = %marker.id(), error = %e, "Failed to process document");
                if let Err(e) = self
                    .messenger
                    .send_event(&marker, Some(e.to_string()), EventType::Fail)
                    .await
                {
                    error!(doc_id = %marker.id(), error = %e, "Failed to send FAIL event");
                }
            }
        }

        self.commit().await;
        if let Some(counter) = &self.retry_counter {
            counter.remove(&marker).await;
        }
    }

    async fn retry_exceeded(&mut self, doc: &Document) -> bool {
        match &self.retry_counter {
            Some(counter) => counter.add(doc).await,
            None => false,
        }
    }

    async fn dead_letter(&mut self, doc: Document) {
        warn!(doc_id = %doc.id(), "Retry limit exceeded, sending to dead-letter channel");
        let marker = identity(&doc);

        if let Err(e) = self.messenger.send_failed(doc).await {
            error!(doc_id = %marker.id(), error = %e, "Failed to send to dead-letter channel");
        }
        if let Err(e) = self
            .messenger
            .send_event(&marker, Some(SENT_TO_DLQ.to_string()), EventType::Fail)
            .await
        {
            error!(doc_id = %marker.id(), error = %e, "Failed to send FAIL event");
        }
    }

    async fn commit(&mut self) {
        if let Err(e) = self.messenger.commit_pending_doc_offsets().await {
            warn!(error = %e, "Failed to commit offsets");
        }
    }

    async fn shutdown(&mut self) {
        self.commit().await;
        if let Err(e) = self.messenger.close().await {
            warn!(error = %e, "Failed to close messenger");
        }
        if let Err(e) = self.pipeline.stop() {
            warn!(error = %e, "Failed to stop pipeline stages");
        }
        self.pipeline.log_metrics();
        info!("Worker stopped");
    }
}

/// A set of workers, each with its own pipeline and messenger handle.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    cancel: CancellationToken,
}

impl WorkerPool {
    /// Spawn `threads` workers. Each gets a messenger from `build_messenger`
    /// and a pipeline from `build_pipeline`.
    ///
    /// A messenger that tracks consumed offsets must not be shared, so the
    /// factory is called once per worker.
    pub fn start<M, F>(
        threads: usize,
        mut build_messenger: M,
        retry_counter: Option<Arc<dyn RetryCounter>>,
        cancel: CancellationToken,
        mut build_pipeline: F,
    ) -> Result<Self, PipelineError>
    where
        M: FnMut() -> Result<Arc<dyn WorkerMessenger>, PipelineError>,
        F: FnMut() -> Result<Pipeline, PipelineError>,
    {
        let threads = threads.max(1);
        let mut workers = Vec::with_capacity(threads);
        for id in 0..threads {
            let mut worker = Worker::new(id, build_messenger()?, build_pipeline()?, cancel.clone());
            if let Some(counter) = &retry_counter {
                worker = worker.with_retry_counter(counter.clone());
            }
            workers.push(worker);
        }

        let handles = workers
            .into_iter()
            .map(|worker| tokio::spawn(worker.run()))
            .collect();
        info!(threads, "Started worker pool");

        Ok(Self { handles, cancel })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Cancel every worker and wait up to `timeout` for each to exit.
    pub async fn stop(self, timeout: Duration) {
        self.cancel.cancel();
        for handle in self.handles {
            match tokio::time::timeout(timeout, handle).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => error!(error = %e, "Worker task failed"),
                Err(_) => warn!(timeout = ?timeout, "Worker did not stop in time"),
            }
        }
    }
}
