//! Destination trait definition.
//!
//! This module defines the abstract interface for delivering batches of
//! documents, allowing for different backend implementations (OpenSearch,
//! in-memory, etc.).

use async_trait::async_trait;

use crate::errors::DestinationError;
use docflow_shared::Document;

/// Abstract interface for the store that processed documents are delivered to.
///
/// # Thread Safety
///
/// All implementations must be `Send + Sync` to allow use across async tasks.
///
/// # Error Handling
///
/// A failed `send_batch` is terminal for every document in the batch; the
/// indexer reports each of them as failed and does not retry.
#[async_trait]
pub trait Destination: Send + Sync {
    /// Check that the destination is reachable and ready to accept documents.
    ///
    /// # Returns
    ///
    /// * `Ok(true)` - If the destination is usable
    /// * `Ok(false)` - If the destination answered but is not usable
    /// * `Err(DestinationError)` - If the check could not be executed
    async fn validate_connection(&self) -> Result<bool, DestinationError>;

    /// Deliver a batch of documents in a single bulk call.
    ///
    /// # Arguments
    ///
    /// * `documents` - The documents to deliver
    ///
    /// # Returns
    ///
    /// * `Ok(())` - If every document was accepted
    /// * `Err(DestinationError)` - If the request or any document in it failed
    async fn send_batch(&self, documents: &[Document]) -> Result<(), DestinationError>;

    /// Release any connection held by the destination.
    async fn close(&self) -> Result<(), DestinationError> {
        Ok(())
    }
}
