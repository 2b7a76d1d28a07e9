//! Ordered composition of stages with lazy fan-out.
//!
//! Processing a document yields, on demand, every document the stages
//! produce from it. Each stage's children are yielded before the document
//! that produced them, and a child created by stage *k* only passes through
//! stages *k+1..n*. Nothing is materialized up front, so even multiplicative
//! fan-out can be consumed item by item.

use std::collections::HashSet;
use std::iter;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::errors::PipelineError;
use crate::stage::{ChildDocuments, ConfiguredStage, StageConfig};
use docflow_shared::Document;

/// Lazy sequence of results for one input document.
pub type PipelineResults<'a> =
    Box<dyn Iterator<Item = Result<Document, PipelineError>> + Send + 'a>;

/// Declarative form of a pipeline: a name and its stages in order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    pub name: String,
    #[serde(default)]
    pub stages: Vec<StageConfig>,
}

impl PipelineConfig {
    /// Stage names as they will be assigned, including defaults.
    pub fn resolved_stage_names(&self) -> Vec<String> {
        self.stages
            .iter()
            .enumerate()
            .map(|(i, stage)| {
                stage
                    .name
                    .clone()
                    .unwrap_or_else(|| format!("stage_{}", i + 1))
            })
            .collect()
    }
}

/// A named, ordered list of stages.
pub struct Pipeline {
    name: String,
    stages: Vec<ConfiguredStage>,
}

impl Pipeline {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            stages: Vec::new(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    pub fn stage_names(&self) -> Vec<&str> {
        self.stages.iter().map(|s| s.name()).collect()
    }

    /// Append a stage. Unnamed stages are called `stage_<position>`; a name
    /// already used in this pipeline is rejected.
    pub fn add_stage(&mut self, mut stage: ConfiguredStage) -> Result<(), PipelineError> {
        stage.set_default_name(self.stages.len() + 1);

        if self.stages.iter().any(|s| s.name() == stage.name()) {
            return Err(PipelineError::config(format!(
                "Duplicate stage name '{}' in pipeline '{}'",
                stage.name(),
                self.name
            )));
        }

        self.stages.push(stage);
        Ok(())
    }

    pub fn start(&mut self) -> Result<(), PipelineError> {
        self.stages.iter_mut().try_for_each(|s| s.start())
    }

    /// Stop every stage, reporting the first failure after all have been stopped.
    pub fn stop(&mut self) -> Result<(), PipelineError> {
        let mut first_error = None;
        for stage in &mut self.stages {
            if let Err(e) = stage.stop() {
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Run `doc` through every stage, returning the lazy sequence of results.
    ///
    /// The input document itself is always the last item (unless an error
    /// ends the sequence early).
    pub fn process_document(&mut self, doc: Document) -> PipelineResults<'_> {
        let start: PipelineResults<'_> = Box::new(iter::once(Ok(doc)));
        self.stages
            .iter_mut()
            .fold(start, |upstream, stage| {
                Box::new(StageIter::new(stage, upstream)) as PipelineResults<'_>
            })
    }

    pub fn log_metrics(&self) {
        info!(pipeline = %self.name, stages = self.stages.len(), "Pipeline metrics");
        for stage in &self.stages {
            stage.log_metrics();
        }
    }
}

/// Check a list of stage names for duplicates without building the stages.
pub fn duplicate_stage_names<'a>(names: impl IntoIterator<Item = &'a str>) -> Vec<String> {
    let mut seen = HashSet::new();
    names
        .into_iter()
        .filter(|name| !seen.insert(*name))
        .map(str::to_string)
        .collect()
}

/// Applies one stage to every document coming from upstream.
///
/// For each upstream document, yields the stage's children first and then
/// the (possibly mutated) document itself.
struct StageIter<'a> {
    stage: &'a mut ConfiguredStage,
    upstream: PipelineResults<'a>,
    children: Option<ChildDocuments>,
    parent: Option<Document>,
}

impl<'a> StageIter<'a> {
    fn new(stage: &'a mut ConfiguredStage, upstream: PipelineResults<'a>) -> Self {
        Self {
            stage,
            upstream,
            children: None,
            parent: None,
        }
    }
}

impl Iterator for StageIter<'_> {
    type Item = Result<Document, PipelineError>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(children) = self.children.as_mut() {
                if let Some(mut child) = children.next() {
                    self.stage.record_child();
                    if child.run_id().is_none() {
                        if let Some(run_id) = self.parent.as_ref().and_then(|p| p.run_id()) {
                            if let Err(e) = child.initialize_run_id(run_id.to_string()) {
                                return Some(Err(PipelineError::stage(self.stage.name(), e.into())));
                            }
                        }
                    }
                    return Some(Ok(child));
                }
                self.children = None;
            }

            if let Some(parent) = self.parent.take() {
                return Some(Ok(parent));
            }

            match self.upstream.next()? {
                Err(e) => return Some(Err(e)),
                Ok(mut doc) => match self.stage.process_conditional(&mut doc) {
                    Err(e) => return Some(Err(e)),
                    Ok(children) => {
                        self.children = children;
                        self.parent = Some(doc);
                    }
                },
            }
        }
    }
}
