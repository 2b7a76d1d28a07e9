//! How a document is laid out when it reaches a destination.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use docflow_shared::Document;

/// Per-destination rules for deriving the delivered id, index and body.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DocumentMapping {
    /// Field whose first value replaces the document id at the destination.
    pub id_override_field: Option<String>,
    /// Field whose first value names the index to write to instead of the default.
    pub index_override_field: Option<String>,
    /// Fields that are never delivered.
    pub ignore_fields: Vec<String>,
}

impl DocumentMapping {
    /// Id under which the document is stored. Falls back to the document id
    /// when the override field is not configured or absent.
    pub fn document_id(&self, document: &Document) -> String {
        self.id_override_field
            .as_deref()
            .and_then(|field| document.get_string(field))
            .unwrap_or_else(|| document.id().to_string())
    }

    /// Index named by the override field, if any.
    pub fn index_override(&self, document: &Document) -> Option<String> {
        self.index_override_field
            .as_deref()
            .and_then(|field| document.get_string(field))
    }

    /// Body to deliver: the flattened document without ignored fields.
    pub fn to_source(&self, document: &Document) -> Map<String, Value> {
        let mut source = document.as_map();
        for field in &self.ignore_fields {
            source.shift_remove(field);
        }
        source
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Document {
        let mut doc = Document::with_run_id("doc1", "run1");
        doc.set_field("external_id", "ext-9").unwrap();
        doc.set_field("target", "archive").unwrap();
        doc.set_field("secret", "hidden").unwrap();
        doc
    }

    #[test]
    fn test_default_mapping_uses_document_id() {
        let mapping = DocumentMapping::default();
        let doc = sample();

        assert_eq!(mapping.document_id(&doc), "doc1");
        assert_eq!(mapping.index_override(&doc), None);

        let source = mapping.to_source(&doc);
        assert_eq!(source.get("id"), Some(&Value::from("doc1")));
        assert_eq!(source.get("run_id"), Some(&Value::from("run1")));
        assert!(source.contains_key("secret"));
    }

    #[test]
    fn test_overrides_and_ignored_fields() {
        let mapping = DocumentMapping {
            id_override_field: Some("external_id".to_string()),
            index_override_field: Some("target".to_string()),
            ignore_fields: vec!["secret".to_string()],
        };
        let doc = sample();

        assert_eq!(mapping.document_id(&doc), "ext-9");
        assert_eq!(mapping.index_override(&doc), Some("archive".to_string()));
        assert!(!mapping.to_source(&doc).contains_key("secret"));
    }

    #[test]
    fn test_missing_override_field_falls_back() {
        let mapping = DocumentMapping {
            id_override_field: Some("missing".to_string()),
            ..Default::default()
        };

        assert_eq!(mapping.document_id(&sample()), "doc1");
    }
}
