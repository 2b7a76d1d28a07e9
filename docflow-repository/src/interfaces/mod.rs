//! Interface definitions for destinations.
//!
//! This module defines the abstract `Destination` trait that allows for
//! dependency injection and swappable destination implementations.

mod destination;
mod mapping;

pub use destination::Destination;
pub use mapping::DocumentMapping;
