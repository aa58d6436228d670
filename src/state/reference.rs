use crate::state::CrawlState;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Bookkeeping record kept for every reference a crawler has seen
///
/// Records are keyed by `reference` inside the reference stores and are
/// upserted from one run to the next.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReferenceRecord {
    /// Unique reference identifier (usually a normalized URL)
    pub reference: String,

    /// Outcome of the run that produced this record, if resolved yet
    #[serde(default)]
    pub state: Option<CrawlState>,

    /// Checksum of the document content
    #[serde(default)]
    pub content_checksum: Option<String>,

    /// Checksum of the document metadata
    #[serde(default)]
    pub metadata_checksum: Option<String>,

    /// Number of consecutive runs this reference ended in an invalid state
    #[serde(default)]
    pub spoiled_streak: u32,

    /// When the record was finalized
    #[serde(default)]
    pub crawl_date: Option<DateTime<Utc>>,
}

impl ReferenceRecord {
    /// Creates a fresh record with no state or checksums
    pub fn new(reference: impl Into<String>) -> Self {
        Self {
            reference: reference.into(),
            state: None,
            content_checksum: None,
            metadata_checksum: None,
            spoiled_streak: 0,
            crawl_date: None,
        }
    }

    /// Returns true if the record holds a valid state
    pub fn is_valid(&self) -> bool {
        self.state.map(|s| s.is_valid()).unwrap_or(false)
    }

    /// Returns true if the record holds an invalid state
    pub fn is_spoiled(&self) -> bool {
        self.state.map(|s| s.is_spoiled()).unwrap_or(false)
    }

    /// Returns true if the previous outcome for this reference was spoiled too
    pub fn was_previously_spoiled(&self) -> bool {
        self.spoiled_streak > 0
    }

    /// Stamps the record with its final state for this run
    ///
    /// The spoiled streak continues from `cached` when the new state is
    /// invalid and resets otherwise.
    pub fn finalize(&mut self, state: CrawlState, cached: Option<&ReferenceRecord>) {
        self.state = Some(state);
        self.spoiled_streak = if state.is_spoiled() {
            cached.map(|c| c.spoiled_streak).unwrap_or(0) + 1
        } else {
            0
        };
        self.crawl_date = Some(Utc::now());
    }
}
