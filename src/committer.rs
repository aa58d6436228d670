//! Committer interface
//!
//! The committer is the downstream sink that receives document additions
//! and removals (a search index, a database, a directory of files...).

use crate::pipeline::{Metadata, DOCUMENT_CHECKSUM_FIELD};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Receives documents to add or remove
///
/// Called concurrently from worker threads.
pub trait Committer: Send + Sync {
    /// Adds or replaces the document for `reference`
    fn add(&self, reference: &str, content: &[u8], metadata: &Metadata) -> anyhow::Result<()>;

    /// Removes the document for `reference`
    fn remove(&self, reference: &str, metadata: &Metadata) -> anyhow::Result<()>;
}

/// One line of a `JsonLinesCommitter` file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitEntry {
    pub op: CommitOp,
    pub reference: String,

    /// Document checksum, when the pipeline computed one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    #[serde(default)]
    pub size: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CommitOp {
    Add,
    Remove,
}

/// Appends one JSON line per addition or removal to a file
pub struct JsonLinesCommitter {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonLinesCommitter {
    pub fn open(path: impl Into<PathBuf>) -> std::io::Result<Self> {
        let path = path.into();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self {
            path,
            file: Mutex::new(file),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write(&self, entry: &CommitEntry) -> anyhow::Result<()> {
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        let mut file = self.file.lock();
        file.write_all(line.as_bytes())?;
        file.flush()?;
        Ok(())
    }

    /// Reads back every entry of a commit file
    pub fn read_entries(path: &Path) -> anyhow::Result<Vec<CommitEntry>> {
        let content = std::fs::read_to_string(path)?;
        content
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| Ok(serde_json::from_str(line)?))
            .collect()
    }
}

impl Committer for JsonLinesCommitter {
    fn add(&self, reference: &str, content: &[u8], metadata: &Metadata) -> anyhow::Result<()> {
        self.write(&CommitEntry {
            op: CommitOp::Add,
            reference: reference.to_string(),
            checksum: metadata.get(DOCUMENT_CHECKSUM_FIELD).map(String::from),
            size: content.len(),
        })
    }

    fn remove(&self, reference: &str, _metadata: &Metadata) -> anyhow::Result<()> {
        self.write(&CommitEntry {
            op: CommitOp::Remove,
            reference: reference.to_string(),
            checksum: None,
            size: 0,
        })
    }
}
