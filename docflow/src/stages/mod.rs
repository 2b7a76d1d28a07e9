//! Built-in stages and the helpers they share.

mod copy_fields;
mod drop_document;
mod emit_children;
mod set_static_values;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use docflow_pipeline::{Registry, Stage, StageError};
use docflow_shared::{Document, DocumentError};

pub use copy_fields::CopyFields;
pub use drop_document::DropDocument;
pub use emit_children::EmitChildren;
pub use set_static_values::SetStaticValues;

pub const SET_STATIC_VALUES: &str = "set_static_values";
pub const COPY_FIELDS: &str = "copy_fields";
pub const DROP_DOCUMENT: &str = "drop_document";
pub const EMIT_CHILDREN: &str = "emit_children";

/// How a stage writes a field that may already have a value.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdateMode {
    /// Replace any existing value.
    #[default]
    Overwrite,
    /// Add to the existing values.
    Append,
    /// Leave an existing field untouched.
    Skip,
}

/// Write `values` to `field` according to `mode`. One value is stored as a
/// scalar, several as a list. Writing nothing is a no-op.
pub fn update_field(
    doc: &mut Document,
    field: &str,
    mode: UpdateMode,
    mut values: Vec<Value>,
) -> Result<(), DocumentError> {
    if values.is_empty() {
        return Ok(());
    }

    match mode {
        UpdateMode::Skip if doc.has(field) => Ok(()),
        UpdateMode::Append => values
            .into_iter()
            .try_for_each(|value| doc.set_or_add(field, value)),
        UpdateMode::Overwrite | UpdateMode::Skip => {
            let value = if values.len() == 1 {
                values.remove(0)
            } else {
                Value::Array(values)
            };
            doc.set_field(field, value)
        }
    }
}

/// Every value of a field, including the managed `id` and `run_id`.
pub fn field_values(doc: &Document, field: &str) -> Vec<Value> {
    match doc.get(field) {
        Some(Value::Array(values)) => values.clone(),
        Some(value) => vec![value.clone()],
        None => doc
            .get_string_list(field)
            .into_iter()
            .map(Value::String)
            .collect(),
    }
}

/// Deserialize a stage's parameter map into its typed form.
pub(crate) fn parse_params<T: DeserializeOwned>(
    kind: &str,
    params: &Map<String, Value>,
) -> Result<T, StageError> {
    serde_json::from_value(Value::Object(params.clone()))
        .map_err(|e| StageError::config(format!("{}: {}", kind, e)))
}

pub fn register(registry: &mut Registry) {
    registry
        .register_stage(SET_STATIC_VALUES, |params| {
            Ok(Box::new(SetStaticValues::from_params(params)?) as Box<dyn Stage>)
        })
        .register_stage(COPY_FIELDS, |params| {
            Ok(Box::new(CopyFields::from_params(params)?) as Box<dyn Stage>)
        })
        .register_stage(DROP_DOCUMENT, |_| {
            Ok(Box::new(DropDocument) as Box<dyn Stage>)
        })
        .register_stage(EMIT_CHILDREN, |params| {
            Ok(Box::new(EmitChildren::from_params(params)?) as Box<dyn Stage>)
        });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_overwrite_replaces() {
        let mut doc = Document::new("d");
        doc.set_field("f", json!("old")).unwrap();

        update_field(&mut doc, "f", UpdateMode::Overwrite, vec![json!("new")]).unwrap();

        assert_eq!(doc.get("f"), Some(&json!("new")));
    }

    #[test]
    fn test_append_builds_a_list() {
        let mut doc = Document::new("d");
        doc.set_field("f", json!("a")).unwrap();

        update_field(&mut doc, "f", UpdateMode::Append, vec![json!("b"), json!("c")]).unwrap();

        assert_eq!(doc.get("f"), Some(&json!(["a", "b", "c"])));
    }

    #[test]
    fn test_skip_keeps_existing() {
        let mut doc = Document::new("d");
        doc.set_field("f", json!("a")).unwrap();

        update_field(&mut doc, "f", UpdateMode::Skip, vec![json!("b")]).unwrap();
        update_field(&mut doc, "g", UpdateMode::Skip, vec![json!("b")]).unwrap();

        assert_eq!(doc.get("f"), Some(&json!("a")));
        assert_eq!(doc.get("g"), Some(&json!("b")));
    }

    #[test]
    fn test_field_values_of_id() {
        let doc = Document::new("d1");

        assert_eq!(field_values(&doc, "id"), vec![json!("d1")]);
        assert!(field_values(&doc, "missing").is_empty());
    }

    #[test]
    fn test_update_mode_from_config() {
        let mode: UpdateMode = serde_json::from_value(json!("append")).unwrap();

        assert_eq!(mode, UpdateMode::Append);
        assert!(serde_json::from_value::<UpdateMode>(json!("merge")).is_err());
    }

    #[test]
    fn test_builtins_are_registered() {
        let mut registry = Registry::new();
        register(&mut registry);

        assert_eq!(
            registry.stage_kinds(),
            vec![COPY_FIELDS, DROP_DOCUMENT, EMIT_CHILDREN, SET_STATIC_VALUES]
        );
    }
}
