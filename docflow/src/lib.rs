//! # Docflow
//!
//! Main library for the docflow document-processing runtime.
//!
//! This crate provides the configuration, the built-in stages, connectors
//! and destinations, and the wiring used by the `docflow` binary.

pub mod config;
pub mod connectors;
pub mod destinations;
pub mod stages;

pub use config::{builtin_registry, Config, ConfigError, Dependencies};

use clap::ValueEnum;
use thiserror::Error;
use tracing_subscriber::EnvFilter;

/// Errors that can occur during startup or execution.
#[derive(Error, Debug)]
pub enum AppError {
    /// Configuration error.
    #[error(transparent)]
    Config(#[from] ConfigError),

    /// Runner error.
    #[error("Run error: {0}")]
    Runner(#[from] docflow_pipeline::RunnerError),

    /// Serialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// IO error.
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Output format of log lines.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, ValueEnum)]
pub enum LogFormat {
    #[default]
    Text,
    Json,
}

/// Install the global subscriber. `RUST_LOG` selects levels, `info` by default.
pub fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}
