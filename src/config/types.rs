use crate::spoiled::SpoiledReferenceStrategizer;
use crate::storage::DEFAULT_COMPACTION_THRESHOLD;
use serde::Deserialize;
use std::path::PathBuf;

/// Main configuration structure for Sumi-Ledger
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub crawler: CrawlerConfig,

    #[serde(rename = "data-store", default)]
    pub data_store: DataStoreConfig,

    #[serde(default)]
    pub checksum: ChecksumConfig,

    #[serde(
        rename = "spoiled-references",
        default = "SpoiledReferenceStrategizer::with_standard_mappings"
    )]
    pub spoiled_references: SpoiledReferenceStrategizer,
}

impl Config {
    /// Minimal configuration for a crawler id and work directory
    pub fn new(id: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            crawler: CrawlerConfig {
                id: id.into(),
                work_dir: work_dir.into(),
                num_threads: default_num_threads(),
                orphans_strategy: OrphansStrategy::default(),
                reject_unmodified: true,
                start_references: Vec::new(),
            },
            data_store: DataStoreConfig::default(),
            checksum: ChecksumConfig::default(),
            spoiled_references: SpoiledReferenceStrategizer::with_standard_mappings(),
        }
    }
}

/// Crawler behavior configuration
#[derive(Debug, Clone, Deserialize)]
pub struct CrawlerConfig {
    /// Crawler identifier, unique within the work directory
    pub id: String,

    /// Root directory for working files
    #[serde(rename = "work-dir", default = "default_work_dir")]
    pub work_dir: PathBuf,

    /// Number of references processed concurrently
    #[serde(rename = "num-threads", default = "default_num_threads")]
    pub num_threads: u32,

    /// What to do with references the previous run saw but this one did not
    #[serde(rename = "orphans-strategy", default)]
    pub orphans_strategy: OrphansStrategy,

    /// Stop processing documents found unmodified since the previous run
    #[serde(rename = "reject-unmodified", default = "default_true")]
    pub reject_unmodified: bool,

    /// References queued at the start of every fresh run
    #[serde(rename = "start-references", default)]
    pub start_references: Vec<String>,
}

/// Handling of orphan references
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrphansStrategy {
    /// Queue orphans and process them like any other reference
    #[default]
    Process,

    /// Remove orphans from the committer
    Delete,

    /// Keep orphans as they were
    Ignore,
}

/// Data-store engine selection
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "engine", rename_all = "lowercase")]
pub enum DataStoreConfig {
    /// Embedded log-structured stores
    Log {
        /// Store directory, defaults to `<work-dir>/<id>/datastore`
        #[serde(default)]
        path: Option<String>,

        /// Stale records tolerated before a store log is compacted
        #[serde(rename = "compaction-threshold", default = "default_compaction_threshold")]
        compaction_threshold: usize,
    },

    /// Stores in a SQLite database
    Sqlite {
        /// Database file or `:memory:`, defaults to `<work-dir>/<id>/datastore.db`
        #[serde(default)]
        connection: Option<String>,
    },
}

impl Default for DataStoreConfig {
    fn default() -> Self {
        DataStoreConfig::Log {
            path: None,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        }
    }
}

impl DataStoreConfig {
    pub fn engine_name(&self) -> &'static str {
        match self {
            DataStoreConfig::Log { .. } => "log",
            DataStoreConfig::Sqlite { .. } => "sqlite",
        }
    }
}

/// Checksum configuration
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChecksumConfig {
    /// Document checksummer
    #[serde(default)]
    pub document: DocumentChecksumKind,

    /// Metadata fields that make up the metadata checksum
    #[serde(rename = "metadata-fields", default)]
    pub metadata_fields: Vec<String>,
}

impl Default for ChecksumConfig {
    fn default() -> Self {
        Self {
            document: DocumentChecksumKind::Sha256,
            metadata_fields: Vec::new(),
        }
    }
}

/// Built-in document checksummers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DocumentChecksumKind {
    #[default]
    Sha256,
    None,
}

fn default_work_dir() -> PathBuf {
    PathBuf::from("./work")
}

fn default_num_threads() -> u32 {
    2
}

fn default_true() -> bool {
    true
}

fn default_compaction_threshold() -> usize {
    DEFAULT_COMPACTION_THRESHOLD
}
