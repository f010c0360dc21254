//! Pipeline construction
//!
//! [`PipelineBuilder`] accumulates stages in append order; [`Pipeline`] is
//! the finalized, immutable sequence handed to submission. The builder never
//! reorders stages and never checks cross-stage semantics.

use aqueduct_common::{AqueductError, Result};
use bson::Document as BsonDocument;
use std::time::Duration;

use crate::stage::Stage;

/// Options recognized by the aggregate command
///
/// Immutable once handed to submission.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateOptions {
    /// Permit stages to spill to disk instead of failing at the server's
    /// per-stage memory ceiling (default: false)
    pub allow_disk_use: bool,
    /// Documents per server batch; must be positive when set
    pub batch_size: Option<u32>,
    /// Server-side time limit for the whole command
    pub max_time: Option<Duration>,
    /// Free-form comment attached to the command, visible in server logs
    pub comment: Option<String>,
}

impl AggregateOptions {
    /// Create options with defaults
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the allow-disk-use flag
    pub fn allow_disk_use(mut self, allow: bool) -> Self {
        self.allow_disk_use = allow;
        self
    }

    /// Set the per-batch document count
    pub fn batch_size(mut self, size: u32) -> Self {
        self.batch_size = Some(size);
        self
    }

    /// Set the server-side time limit
    pub fn max_time(mut self, limit: Duration) -> Self {
        self.max_time = Some(limit);
        self
    }

    /// Attach a comment to the command
    pub fn comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    /// Validate option values before submission
    pub(crate) fn validate(&self) -> Result<()> {
        if self.batch_size == Some(0) {
            return Err(AqueductError::InvalidArgument(
                "Batch size must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Finalized, ordered sequence of stages
///
/// Guaranteed non-empty; stage order equals append order exactly.
#[derive(Debug, Clone, PartialEq)]
pub struct Pipeline {
    stages: Vec<Stage>,
}

impl Pipeline {
    /// The stages in append order
    pub fn stages(&self) -> &[Stage] {
        &self.stages
    }

    /// Number of stages
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Wire form of the pipeline: one single-key document per stage, in
    /// append order
    pub fn to_documents(&self) -> Vec<BsonDocument> {
        self.stages.iter().map(Stage::to_document).collect()
    }
}

/// Builder accumulating stages in append order
#[derive(Debug)]
pub struct PipelineBuilder {
    stages: Vec<Stage>,
}

impl PipelineBuilder {
    /// Create an empty builder
    pub fn new() -> Self {
        Self { stages: Vec::new() }
    }

    /// Validate `stage` and append it after all previously appended stages
    ///
    /// On `InvalidArgument` the already-accumulated stages are untouched and
    /// the builder remains usable.
    pub fn append(&mut self, stage: Stage) -> Result<&mut Self> {
        stage.validate()?;
        self.stages.push(stage);
        Ok(self)
    }

    /// Number of stages appended so far
    pub fn len(&self) -> usize {
        self.stages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// Finalize the pipeline
    ///
    /// Fails with `EmptyPipeline` when no stage was appended.
    pub fn build(self) -> Result<Pipeline> {
        if self.stages.is_empty() {
            return Err(AqueductError::EmptyPipeline);
        }
        Ok(Pipeline {
            stages: self.stages,
        })
    }
}

impl Default for PipelineBuilder {
    fn default() -> Self {
        Self::new()
    }
}
