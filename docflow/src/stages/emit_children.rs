use serde::Deserialize;
use serde_json::{Map, Value};

use super::{field_values, parse_params, EMIT_CHILDREN};
use docflow_pipeline::{ChildDocuments, Stage, StageError};
use docflow_shared::{Document, RESERVED_FIELDS};

fn default_target_field() -> String {
    "value".to_string()
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    source_field: String,
    #[serde(default = "default_target_field")]
    target_field: String,
    #[serde(default)]
    drop_parent: bool,
}

/// Emits one child per value of `source_field`. Children are named
/// `<parent id>-<n>` (1-based) and carry the value in `target_field`.
#[derive(Debug)]
pub struct EmitChildren {
    source_field: String,
    target_field: String,
    drop_parent: bool,
}

impl EmitChildren {
    pub fn new(
        source_field: impl Into<String>,
        target_field: impl Into<String>,
        drop_parent: bool,
    ) -> Self {
        Self {
            source_field: source_field.into(),
            target_field: target_field.into(),
            drop_parent,
        }
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self, StageError> {
        let params: Params = parse_params(EMIT_CHILDREN, params)?;
        if RESERVED_FIELDS.contains(&params.target_field.as_str()) {
            return Err(StageError::config(format!(
                "emit_children: cannot write reserved field '{}'",
                params.target_field
            )));
        }
        Ok(Self::new(
            params.source_field,
            params.target_field,
            params.drop_parent,
        ))
    }
}

impl Stage for EmitChildren {
    fn process_document(&mut self, doc: &mut Document) -> Result<Option<ChildDocuments>, StageError> {
        let values = field_values(doc, &self.source_field);
        if values.is_empty() {
            return Ok(None);
        }

        let mut children = Vec::with_capacity(values.len());
        for (n, value) in values.into_iter().enumerate() {
            let mut child = Document::new(format!("{}-{}", doc.id(), n + 1));
            child.set_field(&self.target_field, value)?;
            children.push(child);
        }

        if self.drop_parent {
            doc.set_dropped(true);
        }
        Ok(Some(Box::new(children.into_iter())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_one_child_per_value() {
        let mut stage = EmitChildren::new("tags", "tag", false);
        let mut doc = Document::new("p");
        doc.set_field("tags", json!(["a", "b"])).unwrap();

        let children: Vec<Document> = stage.process_document(&mut doc).unwrap().unwrap().collect();

        let ids: Vec<_> = children.iter().map(|c| c.id().to_string()).collect();
        assert_eq!(ids, vec!["p-1", "p-2"]);
        assert_eq!(children[1].get("tag"), Some(&json!("b")));
        assert!(!doc.is_dropped());
    }

    #[test]
    fn test_drop_parent() {
        let mut stage = EmitChildren::new("tags", "tag", true);
        let mut doc = Document::new("p");
        doc.set_field("tags", json!("only")).unwrap();

        let children: Vec<Document> = stage.process_document(&mut doc).unwrap().unwrap().collect();

        assert_eq!(children.len(), 1);
        assert!(doc.is_dropped());
    }

    #[test]
    fn test_no_source_values_no_children() {
        let mut stage = EmitChildren::new("tags", "tag", true);
        let mut doc = Document::new("p");

        assert!(stage.process_document(&mut doc).unwrap().is_none());
        assert!(!doc.is_dropped());
    }

    #[test]
    fn test_reserved_target_rejected() {
        let params = match json!({"source_field": "tags", "target_field": "id"}) {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        assert!(EmitChildren::from_params(&params).is_err());
    }
}
