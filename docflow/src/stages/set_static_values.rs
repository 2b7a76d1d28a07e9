use serde::Deserialize;
use serde_json::{Map, Value};

use super::{parse_params, update_field, UpdateMode, SET_STATIC_VALUES};
use docflow_pipeline::{ChildDocuments, Stage, StageError};
use docflow_shared::Document;

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct Params {
    fields: Map<String, Value>,
    #[serde(default)]
    update_mode: UpdateMode,
}

/// Sets fixed values on every document. A list value sets a multi-valued field.
#[derive(Debug)]
pub struct SetStaticValues {
    fields: Map<String, Value>,
    update_mode: UpdateMode,
}

impl SetStaticValues {
    pub fn new(fields: Map<String, Value>, update_mode: UpdateMode) -> Self {
        Self {
            fields,
            update_mode,
        }
    }

    pub fn from_params(params: &Map<String, Value>) -> Result<Self, StageError> {
        let params: Params = parse_params(SET_STATIC_VALUES, params)?;
        if params.fields.is_empty() {
            return Err(StageError::config("set_static_values: 'fields' must not be empty"));
        }
        Ok(Self::new(params.fields, params.update_mode))
    }
}

impl Stage for SetStaticValues {
    fn process_document(&mut self, doc: &mut Document) -> Result<Option<ChildDocuments>, StageError> {
        for (field, value) in &self.fields {
            let values = match value {
                Value::Array(values) => values.clone(),
                other => vec![other.clone()],
            };
            update_field(doc, field, self.update_mode, values)?;
        }
        Ok(None)
    }
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
    fn test_sets_scalars_and_lists() {
        let mut stage = SetStaticValues::from_params(&params(json!({
            "fields": {"source": "crawler", "tags": ["a", "b"]}
        })))
        .unwrap();
        let mut doc = Document::new("d");

        stage.process_document(&mut doc).unwrap();

        assert_eq!(doc.get_string("source").as_deref(), Some("crawler"));
        assert_eq!(doc.get_string_list("tags"), vec!["a", "b"]);
    }

    #[test]
    fn test_reserved_field_fails() {
        let mut stage = SetStaticValues::from_params(&params(json!({
            "fields": {"run_id": "x"}
        })))
        .unwrap();

        assert!(stage.process_document(&mut Document::new("d")).is_err());
    }

    #[test]
    fn test_rejects_bad_params() {
        assert!(SetStaticValues::from_params(&params(json!({"fields": {}}))).is_err());
        assert!(SetStaticValues::from_params(&params(json!({}))).is_err());
        assert!(SetStaticValues::from_params(&params(json!({
            "fields": {"a": 1},
            "update_mode": "merge"
        })))
        .is_err());
    }
}
