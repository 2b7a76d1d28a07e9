//! Built-in connectors.

mod jsonl;
mod sequence;

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;

use docflow_pipeline::{Connector, ConnectorConfig, ConnectorError, Registry};

pub use jsonl::JsonlConnector;
pub use sequence::SequenceConnector;

pub const SEQUENCE: &str = "sequence";
pub const JSONL: &str = "jsonl";

/// Name, pipeline and typed parameters shared by every built-in connector.
#[derive(Debug, Clone)]
pub(crate) struct ConnectorBase<P> {
    pub name: String,
    pub pipeline: Option<String>,
    pub params: P,
}

impl<P: DeserializeOwned> ConnectorBase<P> {
    pub fn from_config(config: &ConnectorConfig) -> Result<Self, ConnectorError> {
        let params = serde_json::from_value(Value::Object(config.params.clone()))
            .map_err(|e| ConnectorError::config(format!("{}: {}", config.kind, e)))?;
        Ok(Self {
            name: config.name.clone().unwrap_or_else(|| config.kind.clone()),
            pipeline: config.pipeline.clone(),
            params,
        })
    }
}

pub fn register(registry: &mut Registry) {
    registry
        .register_connector(SEQUENCE, |config| {
            Ok(Arc::new(SequenceConnector::from_config(config)?) as Arc<dyn Connector>)
        })
        .register_connector(JSONL, |config| {
            Ok(Arc::new(JsonlConnector::from_config(config)?) as Arc<dyn Connector>)
        });
}
