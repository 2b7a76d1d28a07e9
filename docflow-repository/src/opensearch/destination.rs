//! OpenSearch bulk destination implementation.

use async_trait::async_trait;
use opensearch::{
    http::request::JsonBody,
    http::transport::{SingleNodeConnectionPool, TransportBuilder},
    BulkParts, OpenSearch,
};
use serde_json::{json, Value};
use tracing::{debug, error, info, instrument};
use url::Url;

use crate::errors::DestinationError;
use crate::interfaces::Destination;
use crate::opensearch::OpenSearchConfig;
use docflow_shared::Document;

/// Destination that writes batches to OpenSearch with a single bulk request.
///
/// # Example
///
/// ```ignore
/// use docflow_repository::{OpenSearchConfig, OpenSearchDestination};
/// let config = OpenSearchConfig::new("http://localhost:9200", "documents");
/// let destination = OpenSearchDestination::new(config)?;
/// destination.send_batch(&documents).await?;
/// ```
pub struct OpenSearchDestination {
    client: OpenSearch,
    config: OpenSearchConfig,
}

impl OpenSearchDestination {
    /// Create a destination connected to the configured URL.
    ///
    /// # Returns
    ///
    /// * `Ok(OpenSearchDestination)` - A new destination
    /// * `Err(DestinationError)` - If the configuration is invalid or the transport cannot be built
    pub fn new(config: OpenSearchConfig) -> Result<Self, DestinationError> {
        config.validate()?;

        let parsed_url =
            Url::parse(&config.url).map_err(|e| DestinationError::config(e.to_string()))?;

        let conn_pool = SingleNodeConnectionPool::new(parsed_url);
        let transport = TransportBuilder::new(conn_pool)
            .disable_proxy()
            .build()
            .map_err(|e| DestinationError::connection(e.to_string()))?;

        let client = OpenSearch::new(transport);

        info!(url = %config.url, index = %config.index, "Created OpenSearch destination");

        Ok(Self { client, config })
    }

    /// Build the alternating action/source lines of a bulk request.
    fn bulk_body(&self, documents: &[Document]) -> Vec<JsonBody<Value>> {
        let mapping = &self.config.mapping;
        let mut body: Vec<JsonBody<Value>> = Vec::with_capacity(documents.len() * 2);

        for doc in documents {
            let index = mapping
                .index_override(doc)
                .unwrap_or_else(|| self.config.index.clone());
            let doc_id = mapping.document_id(doc);

            body.push(json!({"index": {"_index": index, "_id": doc_id}}).into());
            body.push(Value::Object(mapping.to_source(doc)).into());
        }

        body
    }
}

/// Collect the per-item failures reported in a bulk response.
fn failed_items(response: &Value) -> Vec<String> {
    if !response.get("errors").and_then(Value::as_bool).unwrap_or(false) {
        return Vec::new();
    }

    response
        .get("items")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| item.get("index"))
                .filter_map(|action| {
                    let error = action.get("error")?;
                    let id = action.get("_id").and_then(Value::as_str).unwrap_or("?");
                    Some(format!("{}: {}", id, error))
                })
                .collect()
        })
        .unwrap_or_default()
}

#[async_trait]
impl Destination for OpenSearchDestination {
    async fn validate_connection(&self) -> Result<bool, DestinationError> {
        let response = self
            .client
            .ping()
            .send()
            .await
            .map_err(|e| DestinationError::connection(e.to_string()))?;

        let healthy = response.status_code().is_success();
        debug!(healthy, "OpenSearch ping");
        Ok(healthy)
    }

    /// Any item-level error fails the whole batch.
    #[instrument(skip(self, documents), fields(count = documents.len()))]
    async fn send_batch(&self, documents: &[Document]) -> Result<(), DestinationError> {
        if documents.is_empty() {
            return Ok(());
        }

        let response = self
            .client
            .bulk(BulkParts::Index(&self.config.index))
            .body(self.bulk_body(documents))
            .send()
            .await
            .map_err(|e| DestinationError::connection(e.to_string()))?;

        let status = response.status_code();
        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!(status = %status, body = %error_body, "Bulk request failed");
            return Err(DestinationError::bulk_index(format!(
                "Bulk request failed with status {}: {}",
                status, error_body
            )));
        }

        let body: Value = response
            .json()
            .await
            .map_err(|e| DestinationError::parse(e.to_string()))?;

        let failures = failed_items(&body);
        if !failures.is_empty() {
            error!(failed = failures.len(), "Bulk request had failed items");
            return Err(DestinationError::bulk_index(format!(
                "{} of {} documents failed: {}",
                failures.len(),
                documents.len(),
                failures.join("; ")
            )));
        }

        debug!("Bulk request succeeded");
        Ok(())
    }
}
