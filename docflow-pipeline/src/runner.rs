//! Run orchestration: connectors in sequence, each with its own publisher,
//! worker pool and indexer.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use crate::batch::{Batch, ShardedBatch, SingleBatch};
use crate::connector::{resolve_connector_names, Connector, ConnectorConfig};
use crate::errors::RunnerError;
use crate::indexer::{Indexer, IndexerMetrics};
use crate::messenger::{LocalMessenger, PublisherMessenger, WorkerMessenger};
use crate::pipeline::PipelineConfig;
use crate::publisher::{ConnectorTask, Publisher, PublisherConfig, PublisherStats};
use crate::registry::{DestinationConfig, Registry};
use crate::retry::{InMemoryRetryCounter, RetryCounter};
use crate::worker::WorkerPool;

/// Tunables for a run. Durations are in milliseconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerConfig {
    pub worker_threads: usize,
    pub queue_capacity: usize,
    pub poll_timeout_ms: u64,
    /// Upper bound on documents pending at once; unbounded when absent.
    pub max_pending_docs: Option<usize>,
    /// Dead-letter a document after this many redeliveries.
    pub max_retries: Option<u32>,
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    /// Field whose value picks the batch a document goes to.
    pub shard_field: Option<String>,
    pub connector_timeout_ms: u64,
    pub join_timeout_ms: u64,
    pub log_interval_ms: u64,
    /// Publish through Kafka instead of in-process queues. Workers and
    /// indexers then run as separate processes.
    pub kafka_brokers: Option<String>,
}

impl Default for RunnerConfig {
    fn default() -> Self {
        Self {
            worker_threads: 1,
            queue_capacity: 100,
            poll_timeout_ms: 50,
            max_pending_docs: None,
            max_retries: None,
            batch_size: 100,
            batch_timeout_ms: 100,
            shard_field: None,
            connector_timeout_ms: 24 * 60 * 60 * 1000,
            join_timeout_ms: 3000,
            log_interval_ms: 30_000,
            kafka_brokers: None,
        }
    }
}

impl RunnerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    pub fn batch_timeout(&self) -> Duration {
        Duration::from_millis(self.batch_timeout_ms)
    }

    pub fn connector_timeout(&self) -> Duration {
        Duration::from_millis(self.connector_timeout_ms)
    }

    pub fn join_timeout(&self) -> Duration {
        Duration::from_millis(self.join_timeout_ms)
    }

    pub fn log_interval(&self) -> Duration {
        Duration::from_millis(self.log_interval_ms)
    }

    pub fn build_batch(&self) -> Box<dyn Batch> {
        match &self.shard_field {
            Some(field) => Box::new(ShardedBatch::new(
                field.clone(),
                self.batch_size,
                self.batch_timeout(),
            )),
            None => Box::new(SingleBatch::new(self.batch_size, self.batch_timeout())),
        }
    }

    pub fn validate(&self) -> Result<(), RunnerError> {
        if self.queue_capacity == 0 {
            return Err(RunnerError::config("queue_capacity must be greater than 0"));
        }
        if self.batch_size == 0 {
            return Err(RunnerError::config("batch_size must be greater than 0"));
        }
        if self.max_pending_docs == Some(0) {
            return Err(RunnerError::config("max_pending_docs must be greater than 0"));
        }
        Ok(())
    }
}

/// Outcome of one connector.
#[derive(Debug, Clone)]
pub struct ConnectorResult {
    pub name: String,
    pub success: bool,
    pub error: Option<String>,
    /// Note supplied by the connector itself.
    pub message: Option<String>,
    pub duration: Duration,
    /// Absent when the connector had no pipeline or never got a publisher.
    pub stats: Option<PublisherStats>,
}

impl ConnectorResult {
    pub fn has_failing_docs(&self) -> bool {
        self.stats.is_some_and(|s| s.failed > 0)
    }

    pub fn has_docs(&self) -> bool {
        self.stats
            .is_some_and(|s| s.succeeded + s.failed + s.dropped > 0)
    }
}

impl fmt::Display for ConnectorResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: ", self.name)?;
        if self.success {
            write!(f, "complete. ")?;
            match &self.stats {
                None => write!(f, "No pipeline configured.")?,
                Some(stats) if stats.failed > 0 => write!(
                    f,
                    "{} docs succeeded. {} docs FAILED.",
                    stats.succeeded, stats.failed
                )?,
                Some(stats) => write!(
                    f,
                    "{} docs succeeded. {} docs failed. {} docs dropped.",
                    stats.succeeded, stats.failed, stats.dropped
                )?,
            }
        } else {
            write!(f, "ERROR. {}", self.error.as_deref().unwrap_or("unknown error"))?;
        }
        write!(f, " Time: {:.2} secs.", self.duration.as_secs_f64())?;
        if let Some(message) = &self.message {
            write!(f, "\nMessage from {}: {}", self.name, message)?;
        }
        Ok(())
    }
}

/// Outcome of a whole run.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: String,
    pub success: bool,
    /// Every connector in the run, in order, including ones never reached.
    pub connector_names: Vec<String>,
    pub connector_results: Vec<ConnectorResult>,
}

impl RunResult {
    pub fn has_failing_docs(&self) -> bool {
        self.connector_results.iter().any(ConnectorResult::has_failing_docs)
    }
}

impl fmt::Display for RunResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let status = match (self.success, self.has_failing_docs()) {
            (false, _) => "Failure.",
            (true, true) => "Partial success.",
            (true, false) => "Success.",
        };
        let complete = self.connector_results.iter().filter(|r| r.success).count();
        let docs = if !self.connector_results.iter().any(ConnectorResult::has_docs) {
            "No docs published."
        } else if self.has_failing_docs() {
            "Some docs failed."
        } else {
            "All published docs succeeded."
        };

        writeln!(
            f,
            "RUN SUMMARY: {} {}/{} connectors complete. {}",
            status,
            complete,
            self.connector_names.len(),
            docs
        )?;
        for result in &self.connector_results {
            writeln!(f, "{}", result)?;
        }
        for name in self.connector_names.iter().skip(self.connector_results.len()) {
            writeln!(f, "{}: skipped.", name)?;
        }
        Ok(())
    }
}

/// In-process workers and indexer serving one connector.
struct LocalServices {
    cancel: CancellationToken,
    workers: WorkerPool,
    indexer: JoinHandle<IndexerMetrics>,
}

impl LocalServices {
    async fn stop(self, timeout: Duration) {
        self.cancel.cancel();
        self.workers.stop(timeout).await;
        match tokio::time::timeout(timeout, self.indexer).await {
            Ok(Ok(metrics)) => info!(
                indexed = metrics.indexed,
                failed = metrics.failed,
                "Indexer finished"
            ),
            Ok(Err(e)) => error!(error = %e, "Indexer task failed"),
            Err(_) => warn!(timeout = ?timeout, "Indexer did not stop in time"),
        }
    }
}

/// Executes runs against a fixed set of pipelines and one destination.
pub struct Runner {
    registry: Arc<Registry>,
    config: RunnerConfig,
    pipelines: HashMap<String, PipelineConfig>,
    destination: DestinationConfig,
}

impl Runner {
    pub fn new(
        registry: Arc<Registry>,
        config: RunnerConfig,
        pipelines: Vec<PipelineConfig>,
        destination: DestinationConfig,
    ) -> Self {
        let pipelines = pipelines
            .into_iter()
            .map(|p| (p.name.clone(), p))
            .collect();
        Self {
            registry,
            config,
            pipelines,
            destination,
        }
    }

    pub fn config(&self) -> &RunnerConfig {
        &self.config
    }

    pub fn pipeline(&self, name: &str) -> Result<&PipelineConfig, RunnerError> {
        self.pipelines
            .get(name)
            .ok_or_else(|| RunnerError::config(format!("Unknown pipeline '{}'", name)))
    }

    /// Build everything a run needs without moving any documents.
    pub fn prepare(
        &self,
        connectors: &[ConnectorConfig],
    ) -> Result<Vec<Arc<dyn Connector>>, RunnerError> {
        self.config.validate()?;
        let connectors = resolve_connector_names(connectors)?;

        let mut built = Vec::with_capacity(connectors.len());
        for config in &connectors {
            if let Some(pipeline) = &config.pipeline {
                self.registry.build_pipeline(self.pipeline(pipeline)?)?;
            }
            built.push(self.registry.build_connector(config)?);
        }
        if self.config.kafka_brokers.is_none() {
            self.registry.build_destination(&self.destination)?;
        }
        Ok(built)
    }

    /// Run every connector in order, stopping at the first one that fails.
    ///
    /// A fresh run id is generated when none is given.
    #[instrument(skip_all, fields(run_id = tracing::field::Empty))]
    pub async fn run(
        &self,
        connectors: &[ConnectorConfig],
        run_id: Option<String>,
    ) -> Result<RunResult, RunnerError> {
        let run_id = run_id.unwrap_or_else(|| Uuid::new_v4().to_string());
        tracing::Span::current().record("run_id", run_id.as_str());

        let connectors = self.prepare(connectors)?;
        info!(connectors = connectors.len(), "Starting run");

        let mut results = Vec::with_capacity(connectors.len());
        for connector in &connectors {
            let result = self.run_connector(connector.clone(), &run_id).await;
            info!("{}", result);
            let success = result.success;
            results.push(result);
            if !success {
                warn!(connector = %connector.name(), "Connector failed; skipping the rest of the run");
                break;
            }
        }

        let run = RunResult {
            success: results.len() == connectors.len() && results.iter().all(|r| r.success),
            run_id,
            connector_names: connectors.iter().map(|c| c.name().to_string()).collect(),
            connector_results: results,
        };
        info!(success = run.success, "Run finished");
        Ok(run)
    }

    #[instrument(skip(self, connector, run_id), fields(connector = %connector.name()))]
    async fn run_connector(&self, connector: Arc<dyn Connector>, run_id: &str) -> ConnectorResult {
        let started = Instant::now();
        let mut stats = None;

        let outcome = match connector.pipeline_name() {
            Some(pipeline) => {
                let pipeline = pipeline.to_string();
                self.run_with_pipeline(connector.clone(), &pipeline, run_id, &mut stats)
                    .await
            }
            None => self.run_standalone(connector.as_ref(), run_id).await,
        };

        let outcome = match (outcome, connector.close().await) {
            (Ok(()), Err(e)) => Err(RunnerError::from(e)),
            (outcome, Err(e)) => {
                warn!(error = %e, "Failed to close connector");
                outcome
            }
            (outcome, Ok(())) => outcome,
        };

        ConnectorResult {
            name: connector.name().to_string(),
            success: outcome.is_ok(),
            error: outcome.err().map(|e| e.to_string()),
            message: connector.message(),
            duration: started.elapsed(),
            stats,
        }
    }

    async fn run_standalone(&self, connector: &dyn Connector, run_id: &str) -> Result<(), RunnerError> {
        info!("Running connector without a pipeline");
        connector.pre_execute(run_id).await?;
        connector.execute(None).await?;
        connector.post_execute(run_id).await?;
        Ok(())
    }

    async fn run_with_pipeline(
        &self,
        connector: Arc<dyn Connector>,
        pipeline: &str,
        run_id: &str,
        stats: &mut Option<PublisherStats>,
    ) -> Result<(), RunnerError> {
        let pipeline_config = self.pipeline(pipeline)?;

        let (messenger, services): (Arc<dyn PublisherMessenger>, Option<LocalServices>) =
            match &self.config.kafka_brokers {
                Some(brokers) => (self.kafka_messenger(brokers, pipeline, run_id)?, None),
                None => {
                    let local = Arc::new(LocalMessenger::new(
                        self.config.queue_capacity,
                        self.config.poll_timeout(),
                    ));
                    let services = self.start_local(local.clone(), pipeline_config).await?;
                    (local as Arc<dyn PublisherMessenger>, Some(services))
                }
            };

        let publisher = Arc::new(Publisher::new(
            messenger,
            run_id,
            pipeline,
            PublisherConfig {
                max_pending_docs: self.config.max_pending_docs,
                collapse: connector.requires_collapsing_publisher(),
                log_interval: self.config.log_interval(),
            },
        ));

        let outcome = self.execute(connector, publisher.clone(), run_id).await;
        *stats = Some(publisher.stats());

        if let Err(e) = publisher.close().await {
            warn!(error = %e, "Failed to close publisher");
        }
        if let Some(services) = services {
            services.stop(self.config.join_timeout()).await;
        }
        outcome
    }

    /// Start workers and the indexer, then make sure the destination answers.
    async fn start_local(
        &self,
        messenger: Arc<LocalMessenger>,
        pipeline: &PipelineConfig,
    ) -> Result<LocalServices, RunnerError> {
        let destination = self.registry.build_destination(&self.destination)?;
        let cancel = CancellationToken::new();

        let retry_counter = self
            .config
            .max_retries
            .map(|max| Arc::new(InMemoryRetryCounter::new(max)) as Arc<dyn RetryCounter>);
        let workers = WorkerPool::start(
            self.config.worker_threads,
            || Ok(messenger.clone() as Arc<dyn WorkerMessenger>),
            retry_counter,
            cancel.child_token(),
            || self.registry.build_pipeline(pipeline),
        )?;

        let indexer = Indexer::new(
            messenger,
            destination.clone(),
            self.config.build_batch(),
            cancel.child_token(),
            self.config.log_interval(),
        );
        let services = LocalServices {
            cancel,
            workers,
            indexer: tokio::spawn(indexer.run()),
        };

        let available = match destination.validate_connection().await {
            Ok(true) => Ok(()),
            Ok(false) => Err(RunnerError::config("Destination is not available")),
            Err(e) => Err(RunnerError::from(e)),
        };
        if let Err(e) = available {
            services.stop(self.config.join_timeout()).await;
            return Err(e);
        }
        Ok(services)
    }

    /// Connector lifecycle around a publisher: pre-execute, execute and
    /// flush on a separate task, wait for every document, then post-execute.
    async fn execute(
        &self,
        connector: Arc<dyn Connector>,
        publisher: Arc<Publisher>,
        run_id: &str,
    ) -> Result<(), RunnerError> {
        connector.pre_execute(run_id).await?;

        let mut task = {
            let connector = connector.clone();
            let publisher = publisher.clone();
            ConnectorTask::spawn(async move {
                connector.execute(Some(publisher.as_ref())).await?;
                publisher.flush().await?;
                Ok(())
            })
        };

        if let Err(e) = publisher
            .wait_for_completion(&mut task, self.config.connector_timeout())
            .await
        {
            task.abort();
            return Err(e.into());
        }

        connector.post_execute(run_id).await?;
        Ok(())
    }

    #[cfg(feature = "kafka")]
    fn kafka_messenger(
        &self,
        brokers: &str,
        pipeline: &str,
        run_id: &str,
    ) -> Result<Arc<dyn PublisherMessenger>, RunnerError> {
        let messenger = crate::messenger::KafkaPublisherMessenger::new(
            brokers,
            pipeline,
            run_id,
            self.config.poll_timeout(),
        )?;
        Ok(Arc::new(messenger))
    }

    #[cfg(not(feature = "kafka"))]
    fn kafka_messenger(
        &self,
        _brokers: &str,
        _pipeline: &str,
        _run_id: &str,
    ) -> Result<Arc<dyn PublisherMessenger>, RunnerError> {
        Err(RunnerError::config(
            "Kafka brokers are configured but Kafka support is not compiled in",
        ))
    }

    /// Serve `pipeline` from Kafka with a worker pool until `cancel` fires.
    #[cfg(feature = "kafka")]
    pub async fn run_workers(
        &self,
        pipeline: &str,
        cancel: CancellationToken,
    ) -> Result<(), RunnerError> {
        let brokers = self.kafka_brokers()?;
        let config = self.pipeline(pipeline)?;
        let retry_counter = self
            .config
            .max_retries
            .map(|max| Arc::new(InMemoryRetryCounter::new(max)) as Arc<dyn RetryCounter>);

        // Each worker gets its own consumer so offsets are committed per worker.
        let workers = WorkerPool::start(
            self.config.worker_threads,
            || {
                let messenger = crate::messenger::KafkaWorkerMessenger::new(
                    brokers,
                    pipeline,
                    self.config.poll_timeout(),
                )?;
                Ok(Arc::new(messenger) as Arc<dyn WorkerMessenger>)
            },
            retry_counter,
            cancel.child_token(),
            || self.registry.build_pipeline(config),
        )?;
        cancel.cancelled().await;
        workers.stop(self.config.join_timeout()).await;
        Ok(())
    }

    /// Index documents processed by `pipeline` from Kafka until `cancel` fires.
    #[cfg(feature = "kafka")]
    pub async fn run_indexer(
        &self,
        pipeline: &str,
        cancel: CancellationToken,
    ) -> Result<IndexerMetrics, RunnerError> {
        let brokers = self.kafka_brokers()?;
        let messenger = Arc::new(crate::messenger::KafkaIndexerMessenger::new(
            brokers,
            pipeline,
            self.config.poll_timeout(),
        )?);
        let destination = self.registry.build_destination(&self.destination)?;
        if !destination.validate_connection().await? {
            return Err(RunnerError::config("Destination is not available"));
        }

        let indexer = Indexer::new(
            messenger,
            destination,
            self.config.build_batch(),
            cancel,
            self.config.log_interval(),
        );
        Ok(indexer.run().await)
    }

    #[cfg(feature = "kafka")]
    fn kafka_brokers(&self) -> Result<&str, RunnerError> {
        self.config
            .kafka_brokers
            .as_deref()
            .ok_or_else(|| RunnerError::config("No Kafka brokers configured"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connector::require_publisher;
    use crate::errors::{ConnectorError, StageError};
    use crate::stage::{ChildDocuments, Stage, StageConfig};
    use async_trait::async_trait;
    use docflow_repository::{Destination, DestinationError, InMemoryDestination};
    use docflow_shared::Document;
    use serde_json::{json, Map, Value};
    use std::sync::atomic::{AtomicBool, Ordering};

    /// Publishes `count` documents with ids `<prefix><n>`.
    struct Numbers {
        name: String,
        pipeline: Option<String>,
        count: usize,
        fail_pre: bool,
        post_ran: Arc<AtomicBool>,
    }

    #[async_trait]
    impl Connector for Numbers {
        fn name(&self) -> &str {
            &self.name
        }

        fn pipeline_name(&self) -> Option<&str> {
            self.pipeline.as_deref()
        }

        async fn pre_execute(&self, _run_id: &str) -> Result<(), ConnectorError> {
            if self.fail_pre {
                return Err(ConnectorError::execution("pre-execute failed"));
            }
            Ok(())
        }

        async fn execute(&self, publisher: Option<&Publisher>) -> Result<(), ConnectorError> {
            if self.pipeline.is_none() {
                return Ok(());
            }
            let publisher = require_publisher(self, publisher)?;
            for i in 0..self.count {
                publisher.publish(Document::new(format!("doc{}", i))).await?;
            }
            Ok(())
        }

        async fn post_execute(&self, _run_id: &str) -> Result<(), ConnectorError> {
            self.post_ran.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    /// Emits one child per document and drops documents with `drop` set.
    struct SplitOnce;

    impl Stage for SplitOnce {
        fn process_document(
            &mut self,
            doc: &mut Document,
        ) -> Result<Option<ChildDocuments>, StageError> {
            if doc.id().contains("-child") {
                return Ok(None);
            }
            let child = Document::new(format!("{}-child", doc.id()));
            Ok(Some(Box::new(std::iter::once(child))))
        }
    }

    fn registry(destination: Arc<InMemoryDestination>, post_ran: Arc<AtomicBool>) -> Registry {
        let mut registry = Registry::new();
        registry
            .register_stage("split_once", |_| Ok(Box::new(SplitOnce) as Box<dyn Stage>))
            .register_destination("memory", move |_| {
                Ok(destination.clone() as Arc<dyn Destination>)
            })
            .register_connector("numbers", move |config| {
                let count = config
                    .params
                    .get("count")
                    .and_then(Value::as_u64)
                    .unwrap_or(0) as usize;
                Ok(Arc::new(Numbers {
                    name: config.name.clone().unwrap_or_default(),
                    pipeline: config.pipeline.clone(),
                    count,
                    fail_pre: config.params.contains_key("fail_pre"),
                    post_ran: post_ran.clone(),
                }) as Arc<dyn Connector>)
            });
        registry
    }

    fn runner(registry: Registry) -> Runner {
        let pipeline = PipelineConfig {
            name: "p1".to_string(),
            stages: vec![StageConfig {
                name: None,
                kind: "split_once".to_string(),
                conditions: Vec::new(),
                condition_policy: Default::default(),
                params: Map::new(),
            }],
        };
        let config = RunnerConfig {
            batch_timeout_ms: 10,
            poll_timeout_ms: 10,
            connector_timeout_ms: 10_000,
            ..RunnerConfig::default()
        };
        Runner::new(
            Arc::new(registry),
            config,
            vec![pipeline],
            DestinationConfig::new("memory"),
        )
    }

    fn numbers(count: u64) -> ConnectorConfig {
        ConnectorConfig::new("numbers")
            .with_pipeline("p1")
            .with_param("count", json!(count))
    }

    #[tokio::test]
    async fn test_run_indexes_documents_and_children() {
        let destination = Arc::new(InMemoryDestination::new());
        let post_ran = Arc::new(AtomicBool::new(false));
        let runner = runner(registry(destination.clone(), post_ran.clone()));

        let result = runner
            .run(&[numbers(3)], Some("run1".to_string()))
            .await
            .unwrap();

        assert!(result.success, "{}", result);
        assert_eq!(result.run_id, "run1");
        let stats = result.connector_results[0].stats.unwrap();
        assert_eq!(stats.succeeded, 6);
        assert_eq!(stats.created, 3);
        assert_eq!(stats.pending, 0);
        assert_eq!(destination.documents().len(), 6);
        assert!(post_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_run_generates_run_id() {
        let destination = Arc::new(InMemoryDestination::new());
        let runner = runner(registry(destination, Arc::new(AtomicBool::new(false))));

        let result = runner.run(&[numbers(1)], None).await.unwrap();

        assert!(Uuid::parse_str(&result.run_id).is_ok());
    }

    #[tokio::test]
    async fn test_failed_connector_skips_the_rest() {
        let destination = Arc::new(InMemoryDestination::new());
        let post_ran = Arc::new(AtomicBool::new(false));
        let runner = runner(registry(destination.clone(), post_ran.clone()));
        let connectors = vec![
            numbers(1).named("first").with_param("fail_pre", json!(true)),
            numbers(1).named("second"),
        ];

        let result = runner.run(&connectors, None).await.unwrap();

        assert!(!result.success);
        assert_eq!(result.connector_results.len(), 1);
        assert!(result.connector_results[0]
            .error
            .as_deref()
            .unwrap()
            .contains("pre-execute failed"));
        assert!(!post_ran.load(Ordering::SeqCst));
        assert!(result.to_string().contains("second: skipped."));
        assert!(destination.documents().is_empty());
    }

    #[tokio::test]
    async fn test_connector_without_pipeline() {
        let destination = Arc::new(InMemoryDestination::new());
        let post_ran = Arc::new(AtomicBool::new(false));
        let runner = runner(registry(destination, post_ran.clone()));

        let result = runner
            .run(&[ConnectorConfig::new("numbers")], None)
            .await
            .unwrap();

        assert!(result.success);
        assert!(result.connector_results[0].stats.is_none());
        assert!(result.connector_results[0]
            .to_string()
            .contains("No pipeline configured."));
        assert!(post_ran.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_unavailable_destination_fails_connector() {
        let destination = Arc::new(InMemoryDestination::new());
        destination.set_healthy(false);
        let runner = runner(registry(destination, Arc::new(AtomicBool::new(false))));

        let result = runner.run(&[numbers(1)], None).await.unwrap();

        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_unknown_pipeline_is_a_configuration_error() {
        let destination = Arc::new(InMemoryDestination::new());
        let runner = runner(registry(destination, Arc::new(AtomicBool::new(false))));
        let connector = ConnectorConfig::new("numbers").with_pipeline("missing");

        let err = runner.run(&[connector], None).await.unwrap_err();

        assert!(matches!(err, RunnerError::ConfigError(_)));
    }

    #[tokio::test]
    async fn test_failed_documents_give_partial_success() {
        struct Rejecting;

        #[async_trait]
        impl Destination for Rejecting {
            async fn validate_connection(&self) -> Result<bool, DestinationError> {
                Ok(true)
            }

            async fn send_batch(&self, _documents: &[Document]) -> Result<(), DestinationError> {
                Err(DestinationError::bulk_index("rejected"))
            }
        }

        let mut registry = registry(
            Arc::new(InMemoryDestination::new()),
            Arc::new(AtomicBool::new(false)),
        );
        registry.register_destination("memory", |_| Ok(Arc::new(Rejecting) as Arc<dyn Destination>));
        let runner = runner(registry);

        let result = runner.run(&[numbers(2)], None).await.unwrap();

        assert!(result.success);
        assert!(result.has_failing_docs());
        assert_eq!(result.connector_results[0].stats.unwrap().failed, 4);
        assert!(result.to_string().starts_with("RUN SUMMARY: Partial success."));
    }

    #[test]
    fn test_build_batch_honours_shard_field() {
        let config = RunnerConfig {
            shard_field: Some("tenant".to_string()),
            batch_size: 1,
            ..RunnerConfig::default()
        };
        let mut batch = config.build_batch();

        let mut a = Document::new("a");
        a.set_field("tenant", json!("x")).unwrap();
        let mut b = Document::new("b");
        b.set_field("tenant", json!("y")).unwrap();

        assert!(batch.add(a).is_empty());
        // A different shard does not flush the first one.
        assert!(batch.add(b).is_empty());
        assert_eq!(batch.flush().len(), 2);
    }

    #[test]
    fn test_config_validation() {
        let config = RunnerConfig {
            batch_size: 0,
            ..RunnerConfig::default()
        };

        assert!(config.validate().is_err());
        assert!(RunnerConfig::default().validate().is_ok());
    }
}
