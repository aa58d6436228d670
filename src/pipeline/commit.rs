use crate::events::CrawlerEventKind;
use crate::pipeline::{DocumentPipelineContext, PipelineStage};
use crate::{LedgerError, Result};

/// Sends the document to the committer
///
/// `DocumentCommittedAdd` is fired only when a committer accepted the
/// document; without a committer `DocumentCommitSkipped` is fired instead.
/// Never stops the pipeline.
pub struct CommitModuleStage;

impl PipelineStage<DocumentPipelineContext> for CommitModuleStage {
    fn name(&self) -> &str {
        "commit-module"
    }

    fn execute(&self, context: &mut DocumentPipelineContext) -> Result<bool> {
        let Some(committer) = context.services.committer.clone() else {
            context.fire(CrawlerEventKind::DocumentCommitSkipped);
            return Ok(true);
        };

        let document = &context.document;
        committer
            .add(&document.reference, &document.content, &document.metadata)
            .map_err(|source| LedgerError::Commit {
                reference: document.reference.clone(),
                source,
            })?;

        context.fire(CrawlerEventKind::DocumentCommittedAdd);
        Ok(true)
    }
}
