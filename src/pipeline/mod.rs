//! Ordered stage execution
//!
//! A pipeline runs its stages in order on one mutable context. A stage
//! returning `false` stops the pipeline; a stage error stops it too and is
//! reported with the name of the failing stage.

mod checksum;
mod commit;
pub(crate) mod context;

pub use checksum::{
    resolve_document_checksum, resolve_metadata_checksum, DocumentChecksumStage,
    MetadataChecksumStage, UnmodifiedRejectionStage, DOCUMENT_CHECKSUM_FIELD,
    METADATA_CHECKSUM_FIELD,
};
pub use commit::CommitModuleStage;
pub use context::{CrawlerServices, Document, DocumentPipelineContext, Metadata};

use crate::{LedgerError, Result};

/// One step of a pipeline
pub trait PipelineStage<C>: Send + Sync {
    /// Name used in logs and stage errors
    fn name(&self) -> &str;

    /// Runs the stage; `Ok(false)` stops the pipeline
    fn execute(&self, context: &mut C) -> Result<bool>;
}

/// Ordered list of stages
pub struct Pipeline<C> {
    stages: Vec<Box<dyn PipelineStage<C>>>,
}

impl<C> Default for Pipeline<C> {
    fn default() -> Self {
        Self { stages: Vec::new() }
    }
}

impl<C> Pipeline<C> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends a stage
    pub fn add_stage(mut self, stage: impl PipelineStage<C> + 'static) -> Self {
        self.stages.push(Box::new(stage));
        self
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

    /// Runs every stage in order
    ///
    /// Returns `Ok(true)` when all stages ran, `Ok(false)` when one stopped
    /// the pipeline.
    pub fn execute(&self, context: &mut C) -> Result<bool> {
        for stage in &self.stages {
            match stage.execute(context) {
                Ok(true) => {}
                Ok(false) => {
                    tracing::trace!("Pipeline stopped by stage '{}'", stage.name());
                    return Ok(false);
                }
                Err(e) => {
                    return Err(LedgerError::Stage {
                        stage: stage.name().to_string(),
                        source: Box::new(e),
                    });
                }
            }
        }
        Ok(true)
    }
}

impl Pipeline<DocumentPipelineContext> {
    /// Standard document pipeline
    ///
    /// Metadata checksum, document checksum, unmodified rejection, commit.
    pub fn document_pipeline() -> Self {
        Pipeline::new()
            .add_stage(MetadataChecksumStage)
            .add_stage(DocumentChecksumStage)
            .add_stage(UnmodifiedRejectionStage)
            .add_stage(CommitModuleStage)
    }
}
