//! The document record that flows through the pipeline.
//!
//! A document is an identified, mutable key/value container. Field values are
//! JSON values; a field holding an array is treated as multi-valued. Field
//! order is preserved so that collapsed documents keep the order in which
//! values were published.

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use thiserror::Error;

/// Name of the identifier field.
pub const ID_FIELD: &str = "id";
/// Name of the run identifier field.
pub const RUN_ID_FIELD: &str = "run_id";
/// Name of the dropped flag.
pub const DROPPED_FIELD: &str = "dropped";
/// Name of the field holding attached child documents.
pub const CHILDREN_FIELD: &str = "children";

/// Field names managed by the document itself; they cannot be written as ordinary fields.
pub const RESERVED_FIELDS: [&str; 4] = [ID_FIELD, RUN_ID_FIELD, DROPPED_FIELD, CHILDREN_FIELD];

/// Errors raised by document operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DocumentError {
    /// Attempted to write a reserved field.
    #[error("Field name is reserved: {0}")]
    ReservedField(String),

    /// The document id is missing or empty.
    #[error("Document id must be a non-empty string")]
    MissingId,

    /// The run id was already initialized.
    #[error("Run id already set on document {0}")]
    RunIdAlreadySet(String),

    /// JSON encoding or decoding failed.
    #[error("Serialization error: {0}")]
    SerializationError(String),
}

/// A record flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    run_id: Option<String>,
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    dropped: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    children: Vec<Document>,
    #[serde(flatten)]
    fields: Map<String, Value>,
}

impl Document {
    /// Create an empty document with the given id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            run_id: None,
            dropped: false,
            children: Vec::new(),
            fields: Map::new(),
        }
    }

    /// Create an empty document with the given id and run id.
    pub fn with_run_id(id: impl Into<String>, run_id: impl Into<String>) -> Self {
        let mut doc = Self::new(id);
        doc.run_id = Some(run_id.into());
        doc
    }

    /// Parse a document from its JSON representation.
    ///
    /// The JSON object must contain a non-empty string `id`.
    pub fn from_json(json: &str) -> Result<Self, DocumentError> {
        let doc: Document = serde_json::from_str(json)
            .map_err(|e| DocumentError::SerializationError(e.to_string()))?;
        if doc.id.is_empty() {
            return Err(DocumentError::MissingId);
        }
        Ok(doc)
    }

    /// Serialize the document to JSON.
    pub fn to_json(&self) -> Result<String, DocumentError> {
        serde_json::to_string(self).map_err(|e| DocumentError::SerializationError(e.to_string()))
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn run_id(&self) -> Option<&str> {
        self.run_id.as_deref()
    }

    /// Stamp the run id onto the document.
    ///
    /// Fails if the document already carries a run id.
    pub fn initialize_run_id(&mut self, run_id: impl Into<String>) -> Result<(), DocumentError> {
        if self.run_id.is_some() {
            return Err(DocumentError::RunIdAlreadySet(self.id.clone()));
        }
        self.run_id = Some(run_id.into());
        Ok(())
    }

    pub fn is_dropped(&self) -> bool {
        self.dropped
    }

    pub fn set_dropped(&mut self, dropped: bool) {
        self.dropped = dropped;
    }

    /// Whether the field is present. `id` is always present; `run_id` is present once initialized.
    pub fn has(&self, name: &str) -> bool {
        match name {
            ID_FIELD => true,
            RUN_ID_FIELD => self.run_id.is_some(),
            _ => self.fields.contains_key(name),
        }
    }

    /// Raw value of an ordinary field.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name)
    }

    /// The first value of a field, rendered as a string.
    pub fn get_string(&self, name: &str) -> Option<String> {
        self.get_string_list(name).into_iter().next()
    }

    /// All values of a field rendered as strings. Scalars are stringified;
    /// nulls are skipped. Missing fields yield an empty list.
    pub fn get_string_list(&self, name: &str) -> Vec<String> {
        match name {
            ID_FIELD => return vec![self.id.clone()],
            RUN_ID_FIELD => return self.run_id.iter().cloned().collect(),
            _ => {}
        }

        match self.fields.get(name) {
            None => Vec::new(),
            Some(Value::Array(values)) => values.iter().filter_map(stringify).collect(),
            Some(value) => stringify(value).into_iter().collect(),
        }
    }

    pub fn is_multi_valued(&self, name: &str) -> bool {
        matches!(self.fields.get(name), Some(Value::Array(_)))
    }

    /// Set a field, replacing any existing value.
    pub fn set_field(&mut self, name: &str, value: impl Into<Value>) -> Result<(), DocumentError> {
        validate_field_name(name)?;
        self.fields.insert(name.to_string(), value.into());
        Ok(())
    }

    /// Append a value to a field, converting it to a multi-valued field first.
    pub fn add_to_field(&mut self, name: &str, value: impl Into<Value>) -> Result<(), DocumentError> {
        validate_field_name(name)?;
        self.append_values(name, [value.into()]);
        Ok(())
    }

    /// Set the field if absent, otherwise append to it.
    pub fn set_or_add(&mut self, name: &str, value: impl Into<Value>) -> Result<(), DocumentError> {
        if self.fields.contains_key(name) {
            self.add_to_field(name, value)
        } else {
            self.set_field(name, value)
        }
    }

    /// Merge every ordinary field of `other` into this document.
    ///
    /// Fields missing here are copied as-is; fields present in both become
    /// multi-valued with this document's values first. Reserved fields are
    /// never merged.
    pub fn set_or_add_all(&mut self, other: &Document) {
        for (name, value) in &other.fields {
            if !self.fields.contains_key(name) {
                self.fields.insert(name.clone(), value.clone());
                continue;
            }

            match value {
                Value::Array(values) => self.append_values(name, values.iter().cloned()),
                other => self.append_values(name, [other.clone()]),
            }
        }
    }

    pub fn remove_field(&mut self, name: &str) -> Option<Value> {
        self.fields.shift_remove(name)
    }

    /// Ordinary (non-reserved) fields in insertion order.
    pub fn fields(&self) -> &Map<String, Value> {
        &self.fields
    }

    /// Attach a child document to be carried inside this one.
    pub fn add_child(&mut self, child: Document) {
        self.children.push(child);
    }

    pub fn children(&self) -> &[Document] {
        &self.children
    }

    /// Flat map of the document as it should be delivered to a destination:
    /// `id`, `run_id` (if set) and all ordinary fields.
    pub fn as_map(&self) -> Map<String, Value> {
        let mut map = Map::with_capacity(self.fields.len() + 2);
        map.insert(ID_FIELD.to_string(), Value::String(self.id.clone()));
        if let Some(run_id) = &self.run_id {
            map.insert(RUN_ID_FIELD.to_string(), Value::String(run_id.clone()));
        }
        for (name, value) in &self.fields {
            map.insert(name.clone(), value.clone());
        }
        map
    }

    /// Append values to a field, turning a single existing value into the
    /// first element of the list.
    fn append_values(&mut self, name: &str, new: impl IntoIterator<Item = Value>) {
        let existed = self.fields.contains_key(name);
        let slot = self.fields.entry(name.to_string()).or_insert(Value::Null);
        let mut values = match slot.take() {
            Value::Array(values) => values,
            _ if !existed => Vec::new(),
            single => vec![single],
        };
        values.extend(new);
        *slot = Value::Array(values);
    }
}

fn validate_field_name(name: &str) -> Result<(), DocumentError> {
    if RESERVED_FIELDS.contains(&name) {
        return Err(DocumentError::ReservedField(name.to_string()));
    }
    Ok(())
}

fn stringify(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}
