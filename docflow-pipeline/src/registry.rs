//! Name-to-factory lookup for stages, connectors and destinations.
//!
//! Configuration refers to implementations by a `kind` string. The registry
//! resolves that string to a factory and builds the instance from its
//! parameters, so configuration errors surface before any document moves.

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

use crate::connector::{Connector, ConnectorConfig};
use crate::errors::{ConnectorError, PipelineError, StageError};
use crate::pipeline::{duplicate_stage_names, Pipeline, PipelineConfig};
use crate::stage::{ConfiguredStage, Stage, StageConfig};
use docflow_repository::{Destination, DestinationError};

/// Declarative form of the indexer's destination.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DestinationConfig {
    pub kind: String,
    #[serde(default)]
    pub params: Map<String, Value>,
}

impl DestinationConfig {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            params: Map::new(),
        }
    }
}

pub type StageFactory =
    Arc<dyn Fn(&Map<String, Value>) -> Result<Box<dyn Stage>, StageError> + Send + Sync>;

pub type ConnectorFactory =
    Arc<dyn Fn(&ConnectorConfig) -> Result<Arc<dyn Connector>, ConnectorError> + Send + Sync>;

pub type DestinationFactory = Arc<
    dyn Fn(&Map<String, Value>) -> Result<Arc<dyn Destination>, DestinationError> + Send + Sync,
>;

/// Factories keyed by kind.
#[derive(Clone, Default)]
pub struct Registry {
    stages: HashMap<String, StageFactory>,
    connectors: HashMap<String, ConnectorFactory>,
    destinations: HashMap<String, DestinationFactory>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_stage<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Map<String, Value>) -> Result<Box<dyn Stage>, StageError> + Send + Sync + 'static,
    {
        self.stages.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn register_connector<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&ConnectorConfig) -> Result<Arc<dyn Connector>, ConnectorError>
            + Send
            + Sync
            + 'static,
    {
        self.connectors.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn register_destination<F>(&mut self, kind: impl Into<String>, factory: F) -> &mut Self
    where
        F: Fn(&Map<String, Value>) -> Result<Arc<dyn Destination>, DestinationError>
            + Send
            + Sync
            + 'static,
    {
        self.destinations.insert(kind.into(), Arc::new(factory));
        self
    }

    pub fn stage_kinds(&self) -> Vec<&str> {
        let mut kinds: Vec<&str> = self.stages.keys().map(String::as_str).collect();
        kinds.sort_unstable();
        kinds
    }

    pub fn build_stage(&self, config: &StageConfig) -> Result<ConfiguredStage, PipelineError> {
        let name = config.name.as_deref().unwrap_or(&config.kind);
        let factory = self.stages.get(&config.kind).ok_or_else(|| {
            PipelineError::config(format!("Unknown stage kind '{}'", config.kind))
        })?;
        let stage = factory(&config.params).map_err(|e| PipelineError::stage(name, e))?;
        ConfiguredStage::from_config(config, stage).map_err(|e| PipelineError::stage(name, e))
    }

    /// Build a fresh pipeline instance. Each worker gets its own.
    pub fn build_pipeline(&self, config: &PipelineConfig) -> Result<Pipeline, PipelineError> {
        debug!(pipeline = %config.name, stages = config.stages.len(), "Building pipeline");
        let mut pipeline = Pipeline::new(config.name.clone());
        for stage in &config.stages {
            pipeline.add_stage(self.build_stage(stage)?)?;
        }
        Ok(pipeline)
    }

    /// Every problem with a pipeline definition, without stopping at the first.
    pub fn validate_pipeline(&self, config: &PipelineConfig) -> Vec<String> {
        let mut errors = Vec::new();
        let names = config.resolved_stage_names();
        for duplicate in duplicate_stage_names(names.iter().map(String::as_str)) {
            errors.push(format!("Duplicate stage name '{}'", duplicate));
        }
        for stage in &config.stages {
            if let Err(e) = self.build_stage(stage) {
                errors.push(e.to_string());
            }
        }
        errors
    }

    pub fn build_connector(
        &self,
        config: &ConnectorConfig,
    ) -> Result<Arc<dyn Connector>, ConnectorError> {
        let factory = self.connectors.get(&config.kind).ok_or_else(|| {
            ConnectorError::config(format!("Unknown connector kind '{}'", config.kind))
        })?;
        factory(config)
    }

    pub fn build_destination(
        &self,
        config: &DestinationConfig,
    ) -> Result<Arc<dyn Destination>, DestinationError> {
        let factory = self.destinations.get(&config.kind).ok_or_else(|| {
            DestinationError::config(format!("Unknown destination kind '{}'", config.kind))
        })?;
        factory(&config.params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_repository::InMemoryDestination;
    use docflow_shared::Document;
    use serde_json::json;

    use crate::stage::ChildDocuments;

    struct Tag(String);

    impl Stage for Tag {
        fn process_document(
            &mut self,
            doc: &mut Document,
        ) -> Result<Option<ChildDocuments>, StageError> {
            doc.set_field("tag", json!(self.0))?;
            Ok(None)
        }
    }

    fn registry() -> Registry {
        let mut registry = Registry::new();
        registry
            .register_stage("tag", |params| {
                let value = params
                    .get("value")
                    .and_then(Value::as_str)
                    .ok_or_else(|| StageError::config("missing 'value'"))?;
                Ok(Box::new(Tag(value.to_string())) as Box<dyn Stage>)
            })
            .register_destination("memory", |_| {
                Ok(Arc::new(InMemoryDestination::new()) as Arc<dyn Destination>)
            });
        registry
    }

    fn stage(name: Option<&str>, value: Option<&str>) -> StageConfig {
        let mut params = Map::new();
        if let Some(value) = value {
            params.insert("value".to_string(), json!(value));
        }
        StageConfig {
            name: name.map(str::to_string),
            kind: "tag".to_string(),
            conditions: Vec::new(),
            condition_policy: Default::default(),
            params,
        }
    }

    #[test]
    fn test_build_pipeline() {
        let config = PipelineConfig {
            name: "p1".to_string(),
            stages: vec![stage(None, Some("x")), stage(Some("second"), Some("y"))],
        };

        let mut pipeline = registry().build_pipeline(&config).unwrap();

        assert_eq!(pipeline.stage_names(), vec!["stage_1", "second"]);
        let out: Vec<_> = pipeline
            .process_document(Document::new("d"))
            .collect::<Result<_, _>>()
            .unwrap();
        assert_eq!(out[0].get_string("tag").as_deref(), Some("y"));
    }

    #[test]
    fn test_unknown_stage_kind() {
        let mut config = stage(None, Some("x"));
        config.kind = "missing".to_string();

        let err = registry().build_stage(&config).err().unwrap();

        assert!(err.to_string().contains("missing"));
    }

    #[test]
    fn test_validate_collects_every_error() {
        let config = PipelineConfig {
            name: "p1".to_string(),
            stages: vec![
                stage(Some("a"), Some("x")),
                stage(Some("a"), Some("y")),
                stage(Some("b"), None),
            ],
        };

        let errors = registry().validate_pipeline(&config);

        assert_eq!(errors.len(), 2);
        assert!(errors[0].contains("Duplicate stage name 'a'"));
        assert!(errors[1].contains("missing 'value'"));
    }

    #[test]
    fn test_unknown_connector_and_destination() {
        let registry = registry();

        assert!(registry
            .build_connector(&ConnectorConfig::new("nope"))
            .is_err());
        assert!(registry
            .build_destination(&DestinationConfig::new("nope"))
            .is_err());
        assert!(registry
            .build_destination(&DestinationConfig::new("memory"))
            .is_ok());
    }
}
