use crate::events::CrawlerEventKind;
use crate::pipeline::{DocumentPipelineContext, PipelineStage};
use crate::state::CrawlState;
use crate::{LedgerError, Result};

/// Metadata field receiving the document checksum
pub const DOCUMENT_CHECKSUM_FIELD: &str = "collector.checksum-doc";

/// Metadata field receiving the metadata checksum
pub const METADATA_CHECKSUM_FIELD: &str = "collector.checksum-metadata";

/// Classifies a document from its content checksum
///
/// `new_checksum` is `None` when no checksummer is configured or it could
/// not derive one; the document is then treated as new unless an earlier
/// stage already found it new or modified. Otherwise the checksum is kept on
/// the in-flight record and compared with the previous run's:
/// none -> `New`, equal -> `Unmodified`, different -> `Modified`.
///
/// Always returns true.
pub fn resolve_document_checksum(
    new_checksum: Option<&str>,
    context: &mut DocumentPipelineContext,
) -> bool {
    let Some(new_checksum) = new_checksum else {
        if !context.record.state.map(|s| s.is_new_or_modified()).unwrap_or(false) {
            context.record.state = Some(CrawlState::New);
        }
        return true;
    };

    context.record.content_checksum = Some(new_checksum.to_string());
    context
        .document
        .metadata
        .set(DOCUMENT_CHECKSUM_FIELD, new_checksum);

    let old_checksum = context
        .cached
        .as_ref()
        .and_then(|c| c.content_checksum.as_deref());

    context.record.state = Some(classify(old_checksum, new_checksum));
    tracing::trace!(
        "Document checksum for {}: {:?}",
        context.record.reference,
        context.record.state
    );
    true
}

/// Classifies a document from its metadata checksum
///
/// Returns false, after firing `RejectedUnmodified`, when the metadata is
/// unchanged since the previous run. Without a checksum the state is left
/// alone.
pub fn resolve_metadata_checksum(
    new_checksum: Option<&str>,
    context: &mut DocumentPipelineContext,
) -> bool {
    let Some(new_checksum) = new_checksum else {
        return true;
    };

    context.record.metadata_checksum = Some(new_checksum.to_string());
    context
        .document
        .metadata
        .set(METADATA_CHECKSUM_FIELD, new_checksum);

    let old_checksum = context
        .cached
        .as_ref()
        .and_then(|c| c.metadata_checksum.as_deref());

    let state = classify(old_checksum, new_checksum);
    context.record.state = Some(state);

    if state == CrawlState::Unmodified {
        context.fire(CrawlerEventKind::RejectedUnmodified);
        return false;
    }
    true
}

fn classify(old_checksum: Option<&str>, new_checksum: &str) -> CrawlState {
    match old_checksum {
        None => CrawlState::New,
        Some(old) if old == new_checksum => CrawlState::Unmodified,
        Some(_) => CrawlState::Modified,
    }
}

/// Computes and resolves the metadata checksum, if a checksummer is set
pub struct MetadataChecksumStage;

impl PipelineStage<DocumentPipelineContext> for MetadataChecksumStage {
    fn name(&self) -> &str {
        "metadata-checksum"
    }

    fn execute(&self, context: &mut DocumentPipelineContext) -> Result<bool> {
        let Some(checksummer) = context.services.metadata_checksummer.clone() else {
            return Ok(true);
        };

        let checksum = checksummer
            .create_metadata_checksum(&context.document.metadata)
            .map_err(|source| LedgerError::Checksum {
                reference: context.record.reference.clone(),
                source,
            })?;

        Ok(resolve_metadata_checksum(checksum.as_deref(), context))
    }
}

/// Computes and resolves the document checksum
pub struct DocumentChecksumStage;

impl PipelineStage<DocumentPipelineContext> for DocumentChecksumStage {
    fn name(&self) -> &str {
        "document-checksum"
    }

    fn execute(&self, context: &mut DocumentPipelineContext) -> Result<bool> {
        let checksum = match context.services.document_checksummer.clone() {
            Some(checksummer) => checksummer
                .create_document_checksum(&context.document)
                .map_err(|source| LedgerError::Checksum {
                    reference: context.record.reference.clone(),
                    source,
                })?,
            None => None,
        };

        Ok(resolve_document_checksum(checksum.as_deref(), context))
    }
}

/// Stops unmodified documents before they are committed again
pub struct UnmodifiedRejectionStage;

impl PipelineStage<DocumentPipelineContext> for UnmodifiedRejectionStage {
    fn name(&self) -> &str {
        "unmodified-rejection"
    }

    fn execute(&self, context: &mut DocumentPipelineContext) -> Result<bool> {
        if context.config().crawler.reject_unmodified
            && context.record.state == Some(CrawlState::Unmodified)
        {
            context.fire(CrawlerEventKind::RejectedUnmodified);
            return Ok(false);
        }
        Ok(true)
    }
}
