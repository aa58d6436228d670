/// Crawl state definitions for classifying reference outcomes
///
/// This module defines every outcome a reference can end a run with.
use serde::{Deserialize, Serialize};
use std::fmt;

/// Represents the outcome of processing a reference in a crawl run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlState {
    // ===== Valid States =====
    /// Reference seen for the first time
    New,

    /// Checksum differs from the one cached by the previous run
    Modified,

    /// Checksum matches the one cached by the previous run
    Unmodified,

    // ===== Invalid States =====
    /// Reference could no longer be resolved
    NotFound,

    /// Fetch or processing failed in a recoverable way
    BadStatus,

    /// Processing failed unrecoverably
    Error,
}

impl CrawlState {
    /// Returns true if this state describes a successfully obtained reference
    pub fn is_valid(&self) -> bool {
        matches!(self, Self::New | Self::Modified | Self::Unmodified)
    }

    /// Returns true if this state describes content that needs committing
    pub fn is_new_or_modified(&self) -> bool {
        matches!(self, Self::New | Self::Modified)
    }

    /// Returns true if this state is one of the spoiled (invalid) states
    pub fn is_spoiled(&self) -> bool {
        !self.is_valid()
    }

    /// Converts the crawl state to its persisted string representation
    pub fn to_db_string(&self) -> &'static str {
        match self {
            Self::New => "new",
            Self::Modified => "modified",
            Self::Unmodified => "unmodified",
            Self::NotFound => "not_found",
            Self::BadStatus => "bad_status",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for CrawlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_db_string())
    }
}
