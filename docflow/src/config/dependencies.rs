//! Dependency initialization and wiring for docflow.

use std::sync::Arc;

use tracing::info;

use crate::config::Config;
use crate::{connectors, destinations, stages, AppError};
use docflow_pipeline::{Registry, Runner};

/// Registry holding every built-in stage, connector and destination kind.
pub fn builtin_registry() -> Registry {
    let mut registry = Registry::new();
    stages::register(&mut registry);
    connectors::register(&mut registry);
    destinations::register(&mut registry);
    registry
}

/// Container for all initialized dependencies.
pub struct Dependencies {
    pub config: Config,
    pub registry: Arc<Registry>,
    /// The configured runner ready to execute runs.
    pub runner: Runner,
}

impl Dependencies {
    /// Validate `config` against the built-in registry and build a runner.
    pub fn new(config: Config) -> Result<Self, AppError> {
        Self::with_registry(config, builtin_registry())
    }

    /// Like [`new`](Self::new), with a caller-supplied registry.
    pub fn with_registry(config: Config, registry: Registry) -> Result<Self, AppError> {
        config.validate(&registry)?;

        info!(
            connectors = config.connectors.len(),
            pipelines = config.pipelines.len(),
            destination = %config.indexer.destination.kind,
            kafka = config.kafka.brokers.is_some(),
            "Initializing dependencies"
        );

        let registry = Arc::new(registry);
        let runner = Runner::new(
            registry.clone(),
            config.runner_config(),
            config.pipelines.clone(),
            config.indexer.destination.clone(),
        );

        Ok(Self {
            config,
            registry,
            runner,
        })
    }
}
