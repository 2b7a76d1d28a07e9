//! Error types for the docflow repository.

mod destination_error;

pub use destination_error::DestinationError;
