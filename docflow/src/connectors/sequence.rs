use async_trait::async_trait;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use tracing::info;

use super::ConnectorBase;
use docflow_pipeline::{require_publisher, Connector, ConnectorConfig, ConnectorError, Publisher};
use docflow_shared::Document;

fn default_prefix() -> String {
    "doc".to_string()
}

fn default_repeat() -> usize {
    1
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Params {
    count: usize,
    #[serde(default = "default_prefix")]
    id_prefix: String,
    /// How many consecutive documents to publish per id.
    #[serde(default = "default_repeat")]
    repeat: usize,
    #[serde(default)]
    collapse: bool,
    /// Static fields added to every document.
    #[serde(default)]
    fields: Map<String, Value>,
}

/// Publishes `count` generated documents with ids `<id_prefix><n>`.
pub struct SequenceConnector {
    base: ConnectorBase<Params>,
}

impl SequenceConnector {
    pub fn from_config(config: &ConnectorConfig) -> Result<Self, ConnectorError> {
        let base: ConnectorBase<Params> = ConnectorBase::from_config(config)?;
        if base.params.repeat == 0 {
            return Err(ConnectorError::config("sequence: 'repeat' must be at least 1"));
        }
        Ok(Self { base })
    }

    fn document(&self, n: usize, copy: usize) -> Result<Document, ConnectorError> {
        let mut doc = Document::new(format!("{}{}", self.base.params.id_prefix, n));
        doc.set_field("seq", json!(n))?;
        if self.base.params.repeat > 1 {
            doc.set_field("copy", json!(copy))?;
        }
        for (name, value) in &self.base.params.fields {
            doc.set_field(name, value.clone())?;
        }
        Ok(doc)
    }
}

#[async_trait]
impl Connector for SequenceConnector {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn pipeline_name(&self) -> Option<&str> {
        self.base.pipeline.as_deref()
    }

    fn requires_collapsing_publisher(&self) -> bool {
        self.base.params.collapse
    }

    async fn execute(&self, publisher: Option<&Publisher>) -> Result<(), ConnectorError> {
        let publisher = require_publisher(self, publisher)?;
        let params = &self.base.params;
        for n in 0..params.count {
            for copy in 0..params.repeat {
                publisher.publish(self.document(n, copy)?).await?;
            }
        }
        info!(connector = %self.base.name, count = params.count, "Published sequence");
        Ok(())
    }
}
