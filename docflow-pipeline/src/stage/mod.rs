//! Stages: the units of transformation a pipeline is made of.
//!
//! A [`Stage`] mutates a document in place and may return a lazy sequence of
//! child documents. A [`ConfiguredStage`] wraps a stage with its name, its
//! run conditions and its counters.

mod condition;

use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info};

use crate::errors::{PipelineError, StageError};
use docflow_shared::Document;

pub use condition::{conditions_match, Condition, ConditionConfig, ConditionPolicy, Operator};

/// Children emitted by a stage, produced on demand.
pub type ChildDocuments = Box<dyn Iterator<Item = Document> + Send>;

/// A transformation applied to one document at a time.
///
/// Stages for one document run sequentially; a stage instance is never
/// shared between workers.
pub trait Stage: Send {
    /// Called once before the first document.
    fn start(&mut self) -> Result<(), StageError> {
        Ok(())
    }

    /// Transform `doc` in place. Return `Some` to emit children, which will
    /// only pass through the stages after this one.
    fn process_document(&mut self, doc: &mut Document)
        -> Result<Option<ChildDocuments>, StageError>;

    /// Called once after the last document.
    fn stop(&mut self) -> Result<(), StageError> {
        Ok(())
    }
}

/// Declarative form of a stage inside a pipeline definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StageConfig {
    /// Defaults to `stage_<position>` (1-based).
    #[serde(default)]
    pub name: Option<String>,
    /// Registry key of the stage implementation.
    pub kind: String,
    #[serde(default)]
    pub conditions: Vec<ConditionConfig>,
    #[serde(default)]
    pub condition_policy: ConditionPolicy,
    /// Implementation-specific parameters.
    #[serde(default)]
    pub params: Map<String, Value>,
}

/// Per-stage counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StageMetrics {
    pub processed: u64,
    pub skipped: u64,
    pub children: u64,
    pub errors: u64,
    pub time: Duration,
}

/// A stage together with its name, conditions and counters.
pub struct ConfiguredStage {
    name: Option<String>,
    stage: Box<dyn Stage>,
    conditions: Vec<Condition>,
    policy: ConditionPolicy,
    metrics: StageMetrics,
}

impl ConfiguredStage {
    pub fn new(stage: Box<dyn Stage>) -> Self {
        Self {
            name: None,
            stage,
            conditions: Vec::new(),
            policy: ConditionPolicy::default(),
            metrics: StageMetrics::default(),
        }
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_conditions(mut self, conditions: Vec<Condition>, policy: ConditionPolicy) -> Self {
        self.conditions = conditions;
        self.policy = policy;
        self
    }

    /// Build the wrapper around an instantiated stage from its definition.
    pub fn from_config(config: &StageConfig, stage: Box<dyn Stage>) -> Result<Self, StageError> {
        let conditions = config
            .conditions
            .iter()
            .map(Condition::from_config)
            .collect::<Result<Vec<_>, _>>()?;
        let configured = Self::new(stage).with_conditions(conditions, config.condition_policy);
        Ok(match &config.name {
            Some(name) => configured.named(name.clone()),
            None => configured,
        })
    }

    pub fn name(&self) -> &str {
        self.name.as_deref().unwrap_or("unnamed")
    }

    pub(crate) fn set_default_name(&mut self, position: usize) {
        if self.name.is_none() {
            self.name = Some(format!("stage_{}", position));
        }
    }

    pub fn metrics(&self) -> StageMetrics {
        self.metrics
    }

    /// Dropped documents are never processed.
    pub fn should_process(&self, doc: &Document) -> bool {
        !doc.is_dropped() && conditions_match(&self.conditions, self.policy, doc)
    }

    /// Run the stage on `doc` if its conditions allow it.
    pub fn process_conditional(
        &mut self,
        doc: &mut Document,
    ) -> Result<Option<ChildDocuments>, PipelineError> {
        if !self.should_process(doc) {
            self.metrics.skipped += 1;
            debug!(stage = %self.name(), doc_id = %doc.id(), "Skipping stage");
            return Ok(None);
        }

        let start = Instant::now();
        let result = self.stage.process_document(doc);
        self.metrics.time += start.elapsed();
        self.metrics.processed += 1;

        match result {
            Ok(children) => Ok(children),
            Err(e) => {
                self.metrics.errors += 1;
                Err(PipelineError::stage(self.name(), e))
            }
        }
    }

    pub(crate) fn record_child(&mut self) {
        self.metrics.children += 1;
    }

    pub fn start(&mut self) -> Result<(), PipelineError> {
        self.stage
            .start()
            .map_err(|e| PipelineError::stage(self.name(), e))
    }

    pub fn stop(&mut self) -> Result<(), PipelineError> {
        self.stage
            .stop()
            .map_err(|e| PipelineError::stage(self.name(), e))
    }

    pub fn log_metrics(&self) {
        let m = &self.metrics;
        let mean_ms = if m.processed > 0 {
            m.time.as_secs_f64() * 1000.0 / m.processed as f64
        } else {
            0.0
        };
        info!(
            stage = %self.name(),
            processed = m.processed,
            skipped = m.skipped,
            children = m.children,
            errors = m.errors,
            mean_ms = format!("{:.3}", mean_ms),
            "Stage metrics"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    struct Tag;

    impl Stage for Tag {
        fn process_document(
            &mut self,
            doc: &mut Document,
        ) -> Result<Option<ChildDocuments>, StageError> {
            doc.set_field("tagged", true)?;
            Ok(None)
        }
    }

    struct Broken;

    impl Stage for Broken {
        fn process_document(
            &mut self,
            _doc: &mut Document,
        ) -> Result<Option<ChildDocuments>, StageError> {
            Err(StageError::processing("boom"))
        }
    }

    #[test]
    fn test_conditions_gate_processing() {
        let config: StageConfig = serde_json::from_value(json!({
            "name": "tagger",
            "kind": "tag",
            "conditions": [{"fields": ["color"], "values": ["red"]}]
        }))
        .unwrap();
        let mut stage = ConfiguredStage::from_config(&config, Box::new(Tag)).unwrap();

        let mut red = Document::new("red");
        red.set_field("color", "red").unwrap();
        let mut blue = Document::new("blue");
        blue.set_field("color", "blue").unwrap();

        stage.process_conditional(&mut red).unwrap();
        stage.process_conditional(&mut blue).unwrap();

        assert!(red.has("tagged"));
        assert!(!blue.has("tagged"));
        assert_eq!(stage.metrics().processed, 1);
        assert_eq!(stage.metrics().skipped, 1);
    }

    #[test]
    fn test_dropped_documents_are_skipped() {
        let mut stage = ConfiguredStage::new(Box::new(Tag));
        let mut doc = Document::new("doc1");
        doc.set_dropped(true);

        stage.process_conditional(&mut doc).unwrap();

        assert!(!doc.has("tagged"));
    }

    #[test]
    fn test_errors_carry_stage_name() {
        let mut stage = ConfiguredStage::new(Box::new(Broken)).named("broken");

        let err = stage
            .process_conditional(&mut Document::new("doc1"))
            .err()
            .unwrap();

        assert!(matches!(err, PipelineError::StageFailed { ref stage, .. } if stage == "broken"));
        assert_eq!(stage.metrics().errors, 1);
    }

    #[test]
    fn test_default_name_keeps_explicit_name() {
        let mut unnamed = ConfiguredStage::new(Box::new(Tag));
        let mut named = ConfiguredStage::new(Box::new(Tag)).named("custom");

        unnamed.set_default_name(3);
        named.set_default_name(4);

        assert_eq!(unnamed.name(), "stage_3");
        assert_eq!(named.name(), "custom");
    }
}
