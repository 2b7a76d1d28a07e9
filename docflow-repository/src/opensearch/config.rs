//! Configuration for the OpenSearch destination.

use serde::{Deserialize, Serialize};

use crate::errors::DestinationError;
use crate::interfaces::DocumentMapping;

/// Connection and layout settings for an OpenSearch destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OpenSearchConfig {
    /// Server URL (e.g., "http://localhost:9200").
    pub url: String,
    /// Default index that documents are written to.
    pub index: String,
    #[serde(flatten)]
    pub mapping: DocumentMapping,
}

impl OpenSearchConfig {
    pub fn new(url: impl Into<String>, index: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            index: index.into(),
            mapping: DocumentMapping::default(),
        }
    }

    /// Reject configurations that can never deliver a document.
    pub fn validate(&self) -> Result<(), DestinationError> {
        if self.url.trim().is_empty() {
            return Err(DestinationError::config("OpenSearch url must not be empty"));
        }
        if self.index.trim().is_empty() {
            return Err(DestinationError::config("OpenSearch index must not be empty"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_deserialize_with_mapping() {
        let json = r#"{
            "url": "http://localhost:9200",
            "index": "docs",
            "id_override_field": "external_id",
            "ignore_fields": ["secret"]
        }"#;

        let config: OpenSearchConfig = serde_json::from_str(json).unwrap();

        assert_eq!(config.index, "docs");
        assert_eq!(config.mapping.id_override_field.as_deref(), Some("external_id"));
        assert_eq!(config.mapping.ignore_fields, vec!["secret".to_string()]);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_index() {
        let config = OpenSearchConfig::new("http://localhost:9200", " ");

        assert!(matches!(config.validate(), Err(DestinationError::ConfigError(_))));
    }
}
