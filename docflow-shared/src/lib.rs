//! # Docflow Shared
//!
//! Shared types for the docflow pipeline runtime.
//!
//! - [`Document`]: the mutable record that flows from a connector, through a
//!   pipeline of stages, to a destination.
//! - [`Event`]: an immutable lifecycle signal (`CREATE`, `FINISH`, `FAIL`,
//!   `DROP`) reported by workers and indexers back to the publisher.

mod document;
mod event;

pub use document::{
    Document, DocumentError, CHILDREN_FIELD, DROPPED_FIELD, ID_FIELD, RESERVED_FIELDS,
    RUN_ID_FIELD,
};
pub use event::{Event, EventType};
