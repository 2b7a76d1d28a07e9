//! YAML configuration for a docflow deployment.
//!
//! A configuration file names the connectors of a run, the pipelines they
//! feed and the destination the indexer writes to, plus tuning for each
//! component. Deployment-specific settings can be overridden from the
//! environment (`OPENSEARCH_URL`, `KAFKA_BROKER`).

mod dependencies;

use std::collections::HashSet;
use std::env;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tracing::info;

use crate::destinations::{DEFAULT_INDEX, DEFAULT_OPENSEARCH_URL, OPENSEARCH};
use docflow_pipeline::connector::resolve_connector_names;
use docflow_pipeline::{ConnectorConfig, DestinationConfig, PipelineConfig, Registry, RunnerConfig};

pub use dependencies::{builtin_registry, Dependencies};

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "DOCFLOW_CONFIG";

/// Used when neither `--config` nor `DOCFLOW_CONFIG` is given.
pub const DEFAULT_CONFIG_PATH: &str = "docflow.yaml";

/// Errors raised while loading or validating configuration.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The configuration file could not be read.
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid YAML or does not match the expected shape.
    #[error("Invalid YAML: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// One or more elements failed validation.
    #[error("Invalid configuration: {}", .0.join("; "))]
    Invalid(Vec<String>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerSection {
    pub connector_timeout_ms: u64,
    pub join_timeout_ms: u64,
}

impl Default for RunnerSection {
    fn default() -> Self {
        let defaults = RunnerConfig::default();
        Self {
            connector_timeout_ms: defaults.connector_timeout_ms,
            join_timeout_ms: defaults.join_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PublisherSection {
    pub max_pending_docs: Option<usize>,
    pub queue_capacity: usize,
}

impl Default for PublisherSection {
    fn default() -> Self {
        let defaults = RunnerConfig::default();
        Self {
            max_pending_docs: defaults.max_pending_docs,
            queue_capacity: defaults.queue_capacity,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSection {
    pub threads: usize,
    pub max_retries: Option<u32>,
    pub poll_timeout_ms: u64,
}

impl Default for WorkerSection {
    fn default() -> Self {
        let defaults = RunnerConfig::default();
        Self {
            threads: defaults.worker_threads,
            max_retries: defaults.max_retries,
            poll_timeout_ms: defaults.poll_timeout_ms,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexerSection {
    pub batch_size: usize,
    pub batch_timeout_ms: u64,
    pub shard_field: Option<String>,
    pub destination: DestinationConfig,
}

impl Default for IndexerSection {
    fn default() -> Self {
        let defaults = RunnerConfig::default();
        let mut destination = DestinationConfig::new(OPENSEARCH);
        destination
            .params
            .insert("url".to_string(), Value::from(DEFAULT_OPENSEARCH_URL));
        destination
            .params
            .insert("index".to_string(), Value::from(DEFAULT_INDEX));
        Self {
            batch_size: defaults.batch_size,
            batch_timeout_ms: defaults.batch_timeout_ms,
            shard_field: defaults.shard_field,
            destination,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LogSection {
    /// Seconds between periodic status lines.
    pub seconds: u64,
}

impl Default for LogSection {
    fn default() -> Self {
        Self {
            seconds: RunnerConfig::default().log_interval_ms / 1000,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct KafkaSection {
    pub brokers: Option<String>,
}

/// Complete configuration of a deployment.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub runner: RunnerSection,
    pub publisher: PublisherSection,
    pub worker: WorkerSection,
    pub indexer: IndexerSection,
    pub log: LogSection,
    pub kafka: KafkaSection,
    pub connectors: Vec<ConnectorConfig>,
    pub pipelines: Vec<PipelineConfig>,
}

impl Config {
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigError> {
        Ok(serde_yaml::from_str(yaml)?)
    }

    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let yaml = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "Loaded configuration");
        Self::from_yaml(&yaml)
    }

    /// The file to load: an explicit path, else `DOCFLOW_CONFIG`, else the default.
    pub fn resolve_path(explicit: Option<PathBuf>) -> PathBuf {
        explicit
            .or_else(|| env::var(CONFIG_ENV).ok().map(PathBuf::from))
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    /// Apply `OPENSEARCH_URL` and `KAFKA_BROKER` using `lookup` to read variables.
    pub fn apply_env_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("OPENSEARCH_URL") {
            if self.indexer.destination.kind == OPENSEARCH {
                self.indexer
                    .destination
                    .params
                    .insert("url".to_string(), Value::String(url));
            }
        }
        if let Some(brokers) = lookup("KAFKA_BROKER") {
            self.kafka.brokers = Some(brokers);
        }
    }

    /// Load from the resolved path and apply environment overrides.
    pub fn from_env(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::load(&Self::resolve_path(explicit))?;
        config.apply_env_overrides(|name| env::var(name).ok());
        Ok(config)
    }

    pub fn runner_config(&self) -> RunnerConfig {
        RunnerConfig {
            worker_threads: self.worker.threads,
            queue_capacity: self.publisher.queue_capacity,
            poll_timeout_ms: self.worker.poll_timeout_ms,
            max_pending_docs: self.publisher.max_pending_docs,
            max_retries: self.worker.max_retries,
            batch_size: self.indexer.batch_size,
            batch_timeout_ms: self.indexer.batch_timeout_ms,
            shard_field: self.indexer.shard_field.clone(),
            connector_timeout_ms: self.runner.connector_timeout_ms,
            join_timeout_ms: self.runner.join_timeout_ms,
            log_interval_ms: self.log.seconds * 1000,
            kafka_brokers: self.kafka.brokers.clone(),
        }
    }

    /// Check every element against `registry`, reporting all problems at once.
    pub fn validate(&self, registry: &Registry) -> Result<(), ConfigError> {
        let mut errors = Vec::new();

        if let Err(e) = self.runner_config().validate() {
            errors.push(e.to_string());
        }

        let mut pipeline_names = HashSet::new();
        for pipeline in &self.pipelines {
            if !pipeline_names.insert(pipeline.name.as_str()) {
                errors.push(format!("Duplicate pipeline name '{}'", pipeline.name));
            }
            for error in registry.validate_pipeline(pipeline) {
                errors.push(format!("Pipeline '{}': {}", pipeline.name, error));
            }
        }

        match resolve_connector_names(&self.connectors) {
            Ok(connectors) => {
                for connector in &connectors {
                    let name = connector.name.as_deref().unwrap_or(&connector.kind);
                    if let Some(pipeline) = &connector.pipeline {
                        if !pipeline_names.contains(pipeline.as_str()) {
                            errors.push(format!(
                                "Connector '{}': unknown pipeline '{}'",
                                name, pipeline
                            ));
                        }
                    }
                    if let Err(e) = registry.build_connector(connector) {
                        errors.push(format!("Connector '{}': {}", name, e));
                    }
                }
            }
            Err(e) => errors.push(e.to_string()),
        }

        if let Err(e) = registry.build_destination(&self.indexer.destination) {
            errors.push(format!("Destination: {}", e));
        }

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Invalid(errors))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const CONFIG: &str = r#"
worker:
  threads: 4
indexer:
  batch_size: 10
  destination:
    kind: memory
connectors:
  - kind: sequence
    pipeline: main
    params:
      count: 5
pipelines:
  - name: main
    stages:
      - kind: set_static_values
        params:
          fields:
            source: test
"#;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        let runner = config.runner_config();

        assert_eq!(runner, RunnerConfig::default());
        assert_eq!(config.indexer.destination.kind, OPENSEARCH);
    }

    #[test]
    fn test_from_yaml() {
        let config = Config::from_yaml(CONFIG).unwrap();
        let runner = config.runner_config();

        assert_eq!(runner.worker_threads, 4);
        assert_eq!(runner.batch_size, 10);
        assert_eq!(runner.batch_timeout_ms, 100);
        assert_eq!(config.connectors[0].pipeline.as_deref(), Some("main"));
        assert!(config.validate(&builtin_registry()).is_ok());
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("docflow.yaml");
        std::fs::write(&path, CONFIG).unwrap();

        let config = Config::load(&path).unwrap();

        assert_eq!(config.pipelines[0].name, "main");
        assert!(matches!(
            Config::load(&dir.path().join("missing.yaml")),
            Err(ConfigError::Read { .. })
        ));
    }

    #[test]
    fn test_env_overrides() {
        let vars: HashMap<&str, &str> = [
            ("OPENSEARCH_URL", "http://search:9200"),
            ("KAFKA_BROKER", "kafka:9092"),
        ]
        .into_iter()
        .collect();
        let mut config = Config::default();

        config.apply_env_overrides(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(
            config.indexer.destination.params["url"],
            Value::from("http://search:9200")
        );
        assert_eq!(config.kafka.brokers.as_deref(), Some("kafka:9092"));
    }

    #[test]
    fn test_validation_reports_every_problem() {
        let config = Config::from_yaml(
            r#"
indexer:
  destination:
    kind: nowhere
connectors:
  - name: a
    kind: sequence
    pipeline: missing
    params:
      count: 1
  - name: b
    kind: unknown
pipelines:
  - name: p
    stages:
      - name: s
        kind: drop_document
      - name: s
        kind: drop_document
  - name: p
"#,
        )
        .unwrap();

        let Err(ConfigError::Invalid(errors)) = config.validate(&builtin_registry()) else {
            panic!("expected validation errors");
        };

        let joined = errors.join("\n");
        assert!(joined.contains("Duplicate pipeline name 'p'"));
        assert!(joined.contains("Duplicate stage name 's'"));
        assert!(joined.contains("unknown pipeline 'missing'"));
        assert!(joined.contains("Unknown connector kind 'unknown'"));
        assert!(joined.contains("Unknown destination kind 'nowhere'"));
    }

    #[test]
    fn test_invalid_yaml() {
        assert!(matches!(
            Config::from_yaml("connectors: 5"),
            Err(ConfigError::Yaml(_))
        ));
    }
}
