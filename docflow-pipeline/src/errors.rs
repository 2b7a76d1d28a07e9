//! Error types for the docflow pipeline engine.

use std::time::Duration;

use docflow_repository::DestinationError;
use docflow_shared::DocumentError;
use thiserror::Error;

/// Errors raised by a single stage while transforming a document.
#[derive(Error, Debug)]
pub enum StageError {
    /// The stage was configured with invalid parameters.
    #[error("Stage configuration error: {0}")]
    ConfigError(String),

    /// The stage could not process a document.
    #[error("Stage processing error: {0}")]
    ProcessingError(String),

    /// A document field operation failed.
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
}

impl StageError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create a processing error.
    pub fn processing(msg: impl Into<String>) -> Self {
        Self::ProcessingError(msg.into())
    }
}

/// Errors that can occur while building or running a pipeline.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// A stage failed on a document.
    #[error("Stage '{stage}' failed: {source}")]
    StageFailed {
        stage: String,
        #[source]
        source: StageError,
    },

    /// The pipeline definition is invalid.
    #[error("Pipeline configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Messenger(#[from] MessengerError),
}

impl PipelineError {
    /// Wrap a stage failure with the name of the stage that raised it.
    pub fn stage(stage: impl Into<String>, source: StageError) -> Self {
        Self::StageFailed {
            stage: stage.into(),
            source,
        }
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}

/// Errors from the transport that carries documents and events.
#[derive(Error, Debug)]
pub enum MessengerError {
    /// The other end of a channel has gone away.
    #[error("Channel error: {0}")]
    ChannelError(String),

    /// Kafka-related error.
    #[error("Kafka error: {0}")]
    KafkaError(String),

    /// A document or event could not be encoded or decoded.
    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
}

impl MessengerError {
    /// Create a channel error.
    pub fn channel(msg: impl Into<String>) -> Self {
        Self::ChannelError(msg.into())
    }

    /// Create a Kafka error.
    pub fn kafka(msg: impl Into<String>) -> Self {
        Self::KafkaError(msg.into())
    }
}

#[cfg(feature = "kafka")]
impl From<rdkafka::error::KafkaError> for MessengerError {
    fn from(err: rdkafka::error::KafkaError) -> Self {
        Self::KafkaError(err.to_string())
    }
}

/// Errors surfaced by the publisher.
#[derive(Error, Debug)]
pub enum PublisherError {
    /// `pause` was called while already paused.
    #[error("Publisher is already paused")]
    AlreadyPaused,

    /// `resume` was called while not paused.
    #[error("Publisher is not paused")]
    NotPaused,

    /// The run did not converge before the deadline.
    #[error("Timed out after {elapsed:?} with {pending} documents still pending")]
    Timeout { pending: usize, elapsed: Duration },

    /// The connector feeding the publisher failed.
    #[error("Connector failed: {0}")]
    ConnectorFailed(String),

    #[error(transparent)]
    Messenger(#[from] MessengerError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),
}

/// Errors raised by connectors.
#[derive(Error, Debug)]
pub enum ConnectorError {
    /// The connector was configured with invalid parameters.
    #[error("Connector configuration error: {0}")]
    ConfigError(String),

    /// The connector failed while producing documents.
    #[error("Connector execution error: {0}")]
    ExecutionError(String),

    #[error("Publisher error: {0}")]
    Publisher(#[from] PublisherError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ConnectorError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }

    /// Create an execution error.
    pub fn execution(msg: impl Into<String>) -> Self {
        Self::ExecutionError(msg.into())
    }
}

/// Errors that abort a whole run before or between connectors.
#[derive(Error, Debug)]
pub enum RunnerError {
    /// A name could not be resolved to a factory, or a factory rejected its parameters.
    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    #[error(transparent)]
    Destination(#[from] DestinationError),

    #[error(transparent)]
    Connector(#[from] ConnectorError),

    #[error(transparent)]
    Messenger(#[from] MessengerError),

    #[error(transparent)]
    Publisher(#[from] PublisherError),
}

impl RunnerError {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
