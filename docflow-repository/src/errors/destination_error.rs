//! Destination error types.
//!
//! This module defines the error types that can occur while delivering
//! documents to a destination.

use thiserror::Error;

/// Errors that can occur during destination operations.
#[derive(Error, Debug, Clone)]
pub enum DestinationError {
    /// Failed to establish connection to the destination.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The bulk request was rejected, or some of its items failed.
    #[error("Bulk index error: {0}")]
    BulkIndexError(String),

    /// Failed to parse a response from the destination.
    #[error("Parse error: {0}")]
    ParseError(String),

    /// The destination configuration is invalid.
    #[error("Configuration error: {0}")]
    ConfigError(String),
}

impl DestinationError {
    /// Create a connection error.
    pub fn connection(msg: impl Into<String>) -> Self {
        Self::ConnectionError(msg.into())
    }

    /// Create a bulk index error.
    pub fn bulk_index(msg: impl Into<String>) -> Self {
        Self::BulkIndexError(msg.into())
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::ParseError(msg.into())
    }

    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::ConfigError(msg.into())
    }
}
