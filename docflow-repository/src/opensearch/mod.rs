//! OpenSearch destination.
//!
//! Delivers batches through the `_bulk` API, one index action per document.

mod config;
mod destination;

pub use config::OpenSearchConfig;
pub use destination::OpenSearchDestination;
