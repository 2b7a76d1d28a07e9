//! Built-in destination kinds.

use std::sync::Arc;

use serde_json::{Map, Value};

use docflow_pipeline::Registry;
use docflow_repository::{
    Destination, DestinationError, InMemoryDestination, OpenSearchConfig, OpenSearchDestination,
};

pub const OPENSEARCH: &str = "opensearch";
pub const MEMORY: &str = "memory";

/// Default OpenSearch URL.
pub const DEFAULT_OPENSEARCH_URL: &str = "http://localhost:9200";

/// Default index name.
pub const DEFAULT_INDEX: &str = "documents";

pub fn opensearch(params: &Map<String, Value>) -> Result<Arc<dyn Destination>, DestinationError> {
    let config: OpenSearchConfig = serde_json::from_value(Value::Object(params.clone()))
        .map_err(|e| DestinationError::config(format!("{}: {}", OPENSEARCH, e)))?;
    Ok(Arc::new(OpenSearchDestination::new(config)?))
}

pub fn register(registry: &mut Registry) {
    registry
        .register_destination(OPENSEARCH, opensearch)
        .register_destination(MEMORY, |_| {
            Ok(Arc::new(InMemoryDestination::new()) as Arc<dyn Destination>)
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn params(value: Value) -> Map<String, Value> {
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }

    #[test]
    fn test_opensearch_from_params() {
        let result = opensearch(&params(json!({
            "url": DEFAULT_OPENSEARCH_URL,
            "index": DEFAULT_INDEX,
            "ignore_fields": ["body"]
        })));

        assert!(result.is_ok());
    }

    #[test]
    fn test_opensearch_requires_index() {
        let result = opensearch(&params(json!({"url": DEFAULT_OPENSEARCH_URL})));

        assert!(matches!(result, Err(DestinationError::ConfigError(_))));
    }
}
