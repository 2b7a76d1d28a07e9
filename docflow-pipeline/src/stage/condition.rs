//! Conditions that decide whether a stage runs on a document.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::errors::StageError;
use docflow_shared::Document;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operator {
    #[default]
    Must,
    MustNot,
}

/// How the conditions of one stage combine.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConditionPolicy {
    #[default]
    All,
    Any,
}

/// Declarative form of a [`Condition`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConditionConfig {
    pub fields: Vec<String>,
    #[serde(default)]
    pub values: Option<Vec<Value>>,
    /// File with one value per line. Blank lines are ignored.
    #[serde(default)]
    pub values_path: Option<PathBuf>,
    #[serde(default)]
    pub operator: Operator,
}

/// Field-presence or value-membership predicate over a document.
///
/// With `values`, the condition matches when any value of any listed field is
/// in the set (inverted for `must_not`). Without `values`, `must` requires
/// every field to be present and `must_not` requires every field to be
/// absent. Values are compared as strings, so `10` matches `"10"`. A null
/// in `values` matches a field holding null.
#[derive(Debug, Clone)]
pub struct Condition {
    fields: Vec<String>,
    values: Option<HashSet<String>>,
    match_null: bool,
    operator: Operator,
}

impl Condition {
    pub fn new(fields: Vec<String>, values: Option<HashSet<String>>, operator: Operator) -> Self {
        Self {
            fields,
            values,
            match_null: false,
            operator,
        }
    }

    /// Also match fields holding null. Only meaningful with `values`.
    pub fn matching_null(mut self) -> Self {
        self.match_null = true;
        self
    }

    pub fn from_config(config: &ConditionConfig) -> Result<Self, StageError> {
        let (values, match_null) = match (&config.values, &config.values_path) {
            (Some(_), Some(_)) => {
                return Err(StageError::config(
                    "Specify either 'values' or 'values_path', not both",
                ))
            }
            (Some(values), None) => {
                let set = values
                    .iter()
                    .filter_map(|value| match value {
                        Value::Null => None,
                        Value::String(s) => Some(s.clone()),
                        other => Some(other.to_string()),
                    })
                    .collect();
                (Some(set), values.iter().any(Value::is_null))
            }
            (None, Some(path)) => (Some(load_values(path)?), false),
            (None, None) => (None, false),
        };

        let condition = Self::new(config.fields.clone(), values, config.operator);
        Ok(if match_null {
            condition.matching_null()
        } else {
            condition
        })
    }

    pub fn test(&self, doc: &Document) -> bool {
        let when_found = self.operator == Operator::Must;

        if self.fields.is_empty() {
            return true;
        }

        match &self.values {
            Some(values) => {
                let found = self.fields.iter().any(|field| {
                    (self.match_null && holds_null(doc, field))
                        || doc
                            .get_string_list(field)
                            .iter()
                            .any(|value| values.contains(value))
                });
                if found {
                    when_found
                } else {
                    !when_found
                }
            }
            None if when_found => self.fields.iter().all(|field| doc.has(field)),
            None => self.fields.iter().all(|field| !doc.has(field)),
        }
    }
}

fn holds_null(doc: &Document, field: &str) -> bool {
    match doc.get(field) {
        Some(Value::Null) => true,
        Some(Value::Array(values)) => values.iter().any(Value::is_null),
        _ => false,
    }
}

fn load_values(path: &Path) -> Result<HashSet<String>, StageError> {
    let content = std::fs::read_to_string(path).map_err(|e| {
        StageError::config(format!(
            "Failed to load values from {}: {}",
            path.display(),
            e
        ))
    })?;

    Ok(content
        .lines()
        .map(str::trim)
        .filter(|line| !line.is_empty())
        .map(str::to_string)
        .collect())
}

/// Evaluate a stage's conditions under its policy. No conditions means run.
pub fn conditions_match(conditions: &[Condition], policy: ConditionPolicy, doc: &Document) -> bool {
    if conditions.is_empty() {
        return true;
    }
    match policy {
        ConditionPolicy::All => conditions.iter().all(|c| c.test(doc)),
        ConditionPolicy::Any => conditions.iter().any(|c| c.test(doc)),
    }
}
