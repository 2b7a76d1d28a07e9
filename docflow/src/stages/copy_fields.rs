use serde::Deserialize;
use serde_json::{Map, Value};

use super::{field_values, parse_params, update_field, UpdateMode, COPY_FIELDS};
use docflow_pipeline::{ChildDocuments, Stage, StageError};
use docflow_shared::Document;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    field_mapping: Map<String, Value>,
    #[serde(default)]
    update_mode: UpdateMode,
}

/// Copies the values of source fields into destination fields.
/// Missing source fields are ignored.
#[derive(Debug)]
pub struct CopyFields {
    mapping: Vec<(String, String)>,
    update_mode: UpdateMode,
}

impl CopyFields {
    pub fn new(mapping: Vec<(String, String)>, update_mode: UpdateMode) -> Self {
        Self {
            mapping,
            update_mode,
        }
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self, StageError> {
        let params: Params = parse_params(COPY_FIELDS, params)?;
        if params.field_mapping.is_empty() {
            return Err(StageError::config(
                "copy_fields: 'field_mapping' must have at least one source-dest pair",
            ));
        }

        let mapping = params
            .field_mapping
            .into_iter()
            .map(|(source, dest)| match dest {
                Value::String(dest) => Ok((source, dest)),
                other => Err(StageError::config(format!(
                    "copy_fields: destination for '{}' must be a string, got {}",
                    source, other
                ))),
            })
            .collect::<Result<_, _>>()?;
        Ok(Self::new(mapping, params.update_mode))
    }
}

impl Stage for CopyFields {
    fn process_document(&mut self, doc: &mut Document) -> Result<Option<ChildDocuments>, StageError> {
        for (source, dest) in &self.mapping {
            let values = field_values(doc, source);
            update_field(doc, dest, self.update_mode, values)?;
        }
        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_copies_in_mapping_order() {
        let mut stage = CopyFields::new(
            vec![
                ("title".to_string(), "name".to_string()),
                ("id".to_string(), "original_id".to_string()),
                ("missing".to_string(), "other".to_string()),
            ],
            UpdateMode::Overwrite,
        );
        let mut doc = Document::new("d1");
        doc.set_field("title", json!("Hello")).unwrap();

        stage.process_document(&mut doc).unwrap();

        assert_eq!(doc.get("name"), Some(&json!("Hello")));
        assert_eq!(doc.get("original_id"), Some(&json!("d1")));
        assert!(!doc.has("other"));
    }

    #[test]
    fn test_append_to_existing() {
        let mut stage = CopyFields::new(vec![("a".to_string(), "b".to_string())], UpdateMode::Append);
        let mut doc = Document::new("d");
        doc.set_field("a", json!(["x", "y"])).unwrap();
        doc.set_field("b", json!("w")).unwrap();

        stage.process_document(&mut doc).unwrap();

        assert_eq!(doc.get("b"), Some(&json!(["w", "x", "y"])));
    }

    #[test]
    fn test_non_string_destination_rejected() {
        let params = match json!({"field_mapping": {"a": 1}}) {
            Value::Object(map) => map,
            _ => Map::new(),
        };

        assert!(CopyFields::from_params(&params).is_err());
    }
}
