use std::path::PathBuf;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;
use tokio::fs::File;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, info, warn};

use super::ConnectorBase;
use docflow_pipeline::{require_publisher, Connector, ConnectorConfig, ConnectorError, Publisher};
use docflow_shared::{Document, RESERVED_FIELDS};

fn default_id_field() -> String {
    "id".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Params {
    path: PathBuf,
    /// Field holding the document id.
    #[serde(default = "default_id_field")]
    id_field: String,
    /// Prepended to every id.
    #[serde(default)]
    id_prefix: String,
}

/// Publishes one document per line of a JSON Lines file.
pub struct JsonlConnector {
    base: ConnectorBase<Params>,
}

impl JsonlConnector {
    pub fn from_config(config: &ConnectorConfig) -> Result<Self, ConnectorError> {
        Ok(Self {
            base: ConnectorBase::from_config(config)?,
        })
    }

    fn parse_line(&self, line_number: usize, line: &str) -> Result<Document, ConnectorError> {
        let params = &self.base.params;
        let invalid = |msg: String| {
            ConnectorError::execution(format!(
                "{}:{}: {}",
                params.path.display(),
                line_number,
                msg
            ))
        };

        let mut fields = match serde_json::from_str::<Value>(line) {
            Ok(Value::Object(fields)) => fields,
            Ok(_) => return Err(invalid("expected a JSON object".to_string())),
            Err(e) => return Err(invalid(e.to_string())),
        };

        let id = match fields.shift_remove(&params.id_field) {
            Some(Value::String(id)) if !id.is_empty() => id,
            Some(Value::Number(id)) => id.to_string(),
            _ => return Err(invalid(format!("missing id field '{}'", params.id_field))),
        };

        let mut doc = Document::new(format!("{}{}", params.id_prefix, id));
        for (name, value) in fields {
            if RESERVED_FIELDS.contains(&name.as_str()) {
                debug!(field = %name, "Skipping reserved field");
                continue;
            }
            doc.set_field(&name, value)?;
        }
        Ok(doc)
    }
}

#[async_trait]
impl Connector for JsonlConnector {
    fn name(&self) -> &str {
        &self.base.name
    }

    fn pipeline_name(&self) -> Option<&str> {
        self.base.pipeline.as_deref()
    }

    async fn pre_execute(&self, _run_id: &str) -> Result<(), ConnectorError> {
        let path = &self.base.params.path;
        if !tokio::fs::try_exists(path).await? {
            return Err(ConnectorError::config(format!(
                "jsonl: file not found: {}",
                path.display()
            )));
        }
        Ok(())
    }

    async fn execute(&self, publisher: Option<&Publisher>) -> Result<(), ConnectorError> {
        let publisher = require_publisher(self, publisher)?;
        let path = &self.base.params.path;
        let mut lines = BufReader::new(File::open(path).await?).lines();

        let mut line_number = 0;
        let mut published = 0;
        while let Some(line) = lines.next_line().await? {
            line_number += 1;
            if line.trim().is_empty() {
                continue;
            }
            publisher.publish(self.parse_line(line_number, &line)?).await?;
            published += 1;
        }

        if published == 0 {
            warn!(path = %path.display(), "No documents found");
        }
        info!(path = %path.display(), published, "Finished reading file");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use docflow_pipeline::{LocalMessenger, PublisherConfig, WorkerMessenger};
    use serde_json::json;
    use std::io::Write;
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    fn connector(path: &std::path::Path) -> JsonlConnector {
        let config = ConnectorConfig::new("jsonl")
            .with_pipeline("p1")
            .with_param("path", json!(path.to_string_lossy()));
        JsonlConnector::from_config(&config).unwrap()
    }

    fn publisher(messenger: Arc<LocalMessenger>) -> Publisher {
        Publisher::new(messenger, "run1", "p1", PublisherConfig::default())
    }

    #[tokio::test]
    async fn test_publishes_one_document_per_line() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": "a", "title": "First"}}"#).unwrap();
        writeln!(file).unwrap();
        writeln!(file, r#"{{"id": 2, "tags": ["x", "y"], "run_id": "ignored"}}"#).unwrap();
        let messenger = Arc::new(LocalMessenger::new(100, Duration::from_millis(10)));

        let connector = connector(file.path());
        connector.pre_execute("run1").await.unwrap();
        connector
            .execute(Some(&publisher(messenger.clone())))
            .await
            .unwrap();

        let first = messenger.poll_doc_to_process().await.unwrap().unwrap();
        let second = messenger.poll_doc_to_process().await.unwrap().unwrap();
        assert_eq!(first.id(), "a");
        assert_eq!(first.get_string("title").as_deref(), Some("First"));
        assert_eq!(second.id(), "2");
        assert_eq!(second.run_id(), Some("run1"));
        assert_eq!(second.get_string_list("tags"), vec!["x", "y"]);
        assert!(messenger.poll_doc_to_process().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_invalid_line_reports_position() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"id": "a"}}"#).unwrap();
        writeln!(file, "not json").unwrap();
        let messenger = Arc::new(LocalMessenger::new(100, Duration::from_millis(10)));

        let err = connector(file.path())
            .execute(Some(&publisher(messenger)))
            .await
            .unwrap_err();

        assert!(err.to_string().contains(":2:"));
    }

    #[tokio::test]
    async fn test_missing_id() {
        let mut file = NamedTempFile::new().unwrap();
        writeln!(file, r#"{{"title": "no id"}}"#).unwrap();
        let messenger = Arc::new(LocalMessenger::new(100, Duration::from_millis(10)));

        let err = connector(file.path())
            .execute(Some(&publisher(messenger)))
            .await
            .unwrap_err();

        assert!(err.to_string().contains("missing id field 'id'"));
    }

    #[tokio::test]
    async fn test_missing_file_fails_pre_execute() {
        let dir = tempfile::tempdir().unwrap();

        let result = connector(&dir.path().join("absent.jsonl"))
            .pre_execute("run1")
            .await;

        assert!(matches!(result, Err(ConnectorError::ConfigError(_))));
    }
}
