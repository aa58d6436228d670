//! Sumi-Ledger: crawl bookkeeping for resumable crawlers
//!
//! This crate tracks, across interrupted and resumed runs, which references
//! are new, modified, unmodified or gone, persists that state through a
//! pluggable data-store engine, and decides what to do with references whose
//! processing went bad.

pub mod checksum;
pub mod committer;
pub mod config;
pub mod crawler;
pub mod events;
pub mod pipeline;
pub mod reference;
pub mod spoiled;
pub mod state;
pub mod storage;

use thiserror::Error;

/// Main error type for Sumi-Ledger operations
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] storage::StorageError),

    #[error("Stage '{stage}' failed: {source}")]
    Stage {
        stage: String,
        #[source]
        source: Box<LedgerError>,
    },

    #[error("Checksum error for {reference}: {source}")]
    Checksum {
        reference: String,
        source: anyhow::Error,
    },

    #[error("Commit error for {reference}: {source}")]
    Commit {
        reference: String,
        source: anyhow::Error,
    },

    #[error("Fetch error for {reference}: {source}")]
    Fetch {
        reference: String,
        source: anyhow::Error,
    },

    #[error("Invalid reference: {0}")]
    InvalidReference(String),

    #[error("URL parse error: {0}")]
    UrlParse(#[from] ::url::ParseError),

    #[error("Worker task failed: {0}")]
    Worker(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}

/// Result type alias for Sumi-Ledger operations
pub type Result<T> = std::result::Result<T, LedgerError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{Crawler, CrawlerBuilder};
pub use reference::ReferenceStore;
pub use spoiled::{SpoiledReferenceStrategizer, SpoiledReferenceStrategy};
pub use state::{CrawlState, ReferenceRecord};
pub use storage::{DataStore, DataStoreEngine, DataStoreEngineExt};
