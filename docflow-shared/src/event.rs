//! Lifecycle events reported about documents during a run.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::document::{Document, DocumentError};

/// Kind of lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum EventType {
    /// A child document was created and must be tracked.
    Create,
    /// The document was delivered to the destination.
    Finish,
    /// The document failed processing or delivery.
    Fail,
    /// The document was dropped by the pipeline.
    Drop,
}

impl EventType {
    /// Whether this event type ends a document's lifecycle.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, EventType::Create)
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EventType::Create => "CREATE",
            EventType::Finish => "FINISH",
            EventType::Fail => "FAIL",
            EventType::Drop => "DROP",
        };
        f.write_str(name)
    }
}

/// Something that happened to a document in the context of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    document_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    message: Option<String>,
    #[serde(rename = "type")]
    event_type: EventType,
    timestamp: DateTime<Utc>,
}

impl Event {
    /// Create an event about the given document.
    pub fn new(document: &Document, message: Option<String>, event_type: EventType) -> Self {
        Self::from_parts(
            document.id(),
            document.run_id().map(str::to_string),
            message,
            event_type,
        )
    }

    /// Create an event from its individual parts.
    pub fn from_parts(
        document_id: impl Into<String>,
        run_id: Option<String>,
        message: Option<String>,
        event_type: EventType,
    ) -> Self {
        Self {
            document_id: document_id.into(),
            run_id,
            message,
            event_type,
            timestamp: Utc::now(),
        }
    }

    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        serde_json::from_str(json).map_err(|e| DocumentError::SerializationError(e.to_string()))
    }

    pub fn to_json(&self) -> Result<String, DocumentError> {
        serde_json::to_string(self).map_err(|e| DocumentError::SerializationError(e.to_string()))
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    pub fn event_type(&self) -> EventType {
        self.event_type
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }

    pub fn is_create(&self) -> bool {
        self.event_type == EventType::Create
    }

    pub fn is_terminal(&self) -> bool {
        self.event_type.is_terminal()
    }
}

impl fmt::Display for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.event_type, self.document_id)?;
        if let Some(message) = &self.message {
            write!(f, " ({})", message)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_from_document() {
        let doc = Document::with_run_id("doc1", "run1");
        let event = Event::new(&doc, Some("SUCCEEDED".to_string()), EventType::Finish);

        assert_eq!(event.document_id(), "doc1");
        assert_eq!(event.run_id(), Some("run1"));
        assert_eq!(event.message(), Some("SUCCEEDED"));
        assert!(event.is_terminal());
        assert!(!event.is_create());
    }

    #[test]
    fn test_event_json_uses_wire_names() {
        let event = Event::from_parts("doc1", Some("run1".to_string()), None, EventType::Create);
        let json = event.to_json().unwrap();

        assert!(json.contains(r#""documentId":"doc1""#));
        assert!(json.contains(r#""type":"CREATE""#));
        assert_eq!(Event::from_json(&json).unwrap(), event);
    }

    #[test]
    fn test_display() {
        let event = Event::from_parts("doc1", None, Some("boom".to_string()), EventType::Fail);
        assert_eq!(event.to_string(), "FAIL doc1 (boom)");
    }
}
