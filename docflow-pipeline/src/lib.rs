//! # Docflow Pipeline
//!
//! This crate is the execution engine of the docflow runtime: it moves
//! documents from connectors through pipelines of stages into a destination,
//! and decides when a run is complete.
//!
//! ## Architecture
//!
//! 1. **Connector**: produces documents and hands them to the publisher
//! 2. **Publisher**: tracks every published document and child until a terminal event
//! 3. **Worker**: runs each document through a pipeline of stages
//! 4. **Indexer**: batches processed documents and delivers them to a destination
//! 5. **Runner**: wires the above together for each connector of a run
//!
//! Components talk through role-specific messenger traits, backed either by
//! in-process queues or by Kafka topics (`kafka` feature).

pub mod batch;
pub mod connector;
pub mod errors;
pub mod indexer;
pub mod messenger;
pub mod pipeline;
pub mod publisher;
pub mod registry;
pub mod retry;
pub mod runner;
pub mod stage;
pub mod worker;

pub use batch::{Batch, ShardedBatch, SingleBatch};
pub use connector::{require_publisher, Connector, ConnectorConfig};
pub use errors::{
    ConnectorError, MessengerError, PipelineError, PublisherError, RunnerError, StageError,
};
pub use indexer::{Indexer, IndexerMetrics};
pub use messenger::{IndexerMessenger, LocalMessenger, PublisherMessenger, WorkerMessenger};
pub use pipeline::{Pipeline, PipelineConfig};
pub use publisher::{Publisher, PublisherConfig, PublisherStats};
pub use registry::{DestinationConfig, Registry};
pub use retry::{InMemoryRetryCounter, RetryCounter};
pub use runner::{ConnectorResult, RunResult, Runner, RunnerConfig};
pub use stage::{ChildDocuments, ConfiguredStage, Stage, StageConfig};
pub use worker::{Worker, WorkerPool};
