//! Fetcher interface
//!
//! Fetching is left to the embedding application (HTTP client, file system
//! walker, database reader...). The crawler only needs to know whether a
//! reference produced a document and, if not, why.

use crate::pipeline::{Document, Metadata};
use chrono::{DateTime, Utc};

/// Result of fetching one reference
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    /// The document was retrieved
    Document(Document),

    /// The reference no longer exists
    NotFound,

    /// The source answered with an unusable status
    BadStatus(u16),
}

/// Retrieves documents for references
///
/// Called from blocking worker threads, possibly concurrently. An `Err`
/// marks the reference as `CrawlState::Error` for this run.
pub trait Fetcher: Send + Sync {
    fn fetch(&self, reference: &str) -> anyhow::Result<FetchOutcome>;
}

impl<F> Fetcher for F
where
    F: Fn(&str) -> anyhow::Result<FetchOutcome> + Send + Sync,
{
    fn fetch(&self, reference: &str) -> anyhow::Result<FetchOutcome> {
        self(reference)
    }
}

/// Fetches references that are local file paths
///
/// Sets `Content-Length` and `Last-Modified` metadata so that a metadata
/// checksum over those fields can skip unchanged files without reading them
/// twice.
#[derive(Debug, Clone, Copy, Default)]
pub struct FileFetcher;

impl Fetcher for FileFetcher {
    fn fetch(&self, reference: &str) -> anyhow::Result<FetchOutcome> {
        let path = reference.strip_prefix("file://").unwrap_or(reference);

        let stat = match std::fs::metadata(path) {
            Ok(stat) => stat,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(FetchOutcome::NotFound),
            Err(e) => return Err(e.into()),
        };
        if !stat.is_file() {
            return Ok(FetchOutcome::NotFound);
        }

        let content = std::fs::read(path)?;
        let mut metadata = Metadata::new();
        metadata.set("Content-Length", content.len().to_string());
        if let Ok(modified) = stat.modified() {
            metadata.set("Last-Modified", DateTime::<Utc>::from(modified).to_rfc3339());
        }

        Ok(FetchOutcome::Document(
            Document::new(reference, content).with_metadata(metadata),
        ))
    }
}
