//! # Docflow Repository
//!
//! This crate provides the destination abstraction that the indexer delivers
//! batches to. It includes definitions for errors, the `Destination` trait,
//! an OpenSearch bulk implementation and an in-memory implementation.

pub mod errors;
pub mod interfaces;
pub mod memory;
pub mod opensearch;

pub use errors::DestinationError;
pub use interfaces::{Destination, DocumentMapping};
pub use memory::InMemoryDestination;
pub use opensearch::{OpenSearchConfig, OpenSearchDestination};
