//! Connectors: the sources of documents for a run.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::errors::ConnectorError;
use crate::publisher::Publisher;

/// Declarative form of a connector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConnectorConfig {
    /// Defaults to `connector_<position>` (1-based).
    #[serde(default)]
    pub name: Option<String>,
    /// Registry key of the connector implementation.
    pub kind: String,
    /// Pipeline that processes the published documents. Without one the
    /// connector runs on its own and publishes nothing.
    #[serde(default)]
    pub pipeline: Option<String>,
    /// Implementation-specific parameters.
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl ConnectorConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            name: None,
            kind: kind.into(),
            pipeline: None,
            params: Map::new(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_pipeline(mut self, pipeline: impl Into<String>) -> Self {
        self.pipeline = Some(pipeline.into());
        self
    }

    pub fn with_param(mut self, key: impl Into<String>, value: Value) -> Self {
        self.params.insert(key.into(), value);
        self
    }
}

/// Assign `connector_<n>` to unnamed connectors and reject duplicate names.
pub fn resolve_connector_names(
    configs: &[ConnectorConfig],
) -> Result<Vec<ConnectorConfig>, ConnectorError> {
    let mut resolved: Vec<ConnectorConfig> = Vec::with_capacity(configs.len());
    for (i, config) in configs.iter().enumerate() {
        let mut config = config.clone();
        let name = config
            .name
            .get_or_insert_with(|| format!("connector_{}", i + 1))
            .clone();
        if resolved.iter().any(|c| c.name.as_deref() == Some(name.as_str())) {
            return Err(ConnectorError::config(format!(
                "Two connectors cannot share the same name: {}",
                name
            )));
        }
        resolved.push(config);
    }
    Ok(resolved)
}

/// A source of documents.
///
/// The runner calls `pre_execute`, then `execute` on its own task, then
/// `post_execute` only if the run converged, and finally `close` in every case.
#[async_trait]
pub trait Connector: Send + Sync {
    fn name(&self) -> &str;

    /// Pipeline the published documents go through, if any.
    fn pipeline_name(&self) -> Option<&str>;

    /// Whether consecutive documents sharing an id should be merged.
    fn requires_collapsing_publisher(&self) -> bool {
        false
    }

    async fn pre_execute(&self, _run_id: &str) -> Result<(), ConnectorError> {
        Ok(())
    }

    /// Produce documents. `publisher` is `None` when the connector has no pipeline.
    async fn execute(&self, publisher: Option<&Publisher>) -> Result<(), ConnectorError>;

    async fn post_execute(&self, _run_id: &str) -> Result<(), ConnectorError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), ConnectorError> {
        Ok(())
    }

    /// Optional note appended to the connector's result line.
    fn message(&self) -> Option<String> {
        None
    }
}

/// Borrow the publisher a pipeline-bound connector needs.
pub fn require_publisher<'a>(
    connector: &dyn Connector,
    publisher: Option<&'a Publisher>,
) -> Result<&'a Publisher, ConnectorError> {
    publisher.ok_or_else(|| {
        ConnectorError::config(format!(
            "Connector '{}' has no pipeline to publish to",
            connector.name()
        ))
    })
}
