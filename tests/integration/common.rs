//! Shared fixtures for the integration tests

use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use sumi_ledger::committer::Committer;
use sumi_ledger::config::{Config, DataStoreConfig};
use sumi_ledger::crawler::{FetchOutcome, Fetcher};
use sumi_ledger::pipeline::{Document, Metadata};
use sumi_ledger::storage::DEFAULT_COMPACTION_THRESHOLD;
use sumi_ledger::Crawler;
use tempfile::TempDir;

/// Both engines, so every scenario runs against each backend
pub fn engines() -> Vec<DataStoreConfig> {
    vec![
        DataStoreConfig::Log {
            path: None,
            compaction_threshold: DEFAULT_COMPACTION_THRESHOLD,
        },
        DataStoreConfig::Sqlite { connection: None },
    ]
}

/// Fetcher serving a mutable set of documents
///
/// Unknown references fail with an error.
#[derive(Default)]
pub struct Site {
    pages: Mutex<HashMap<String, FetchOutcome>>,
    fetched: Mutex<Vec<String>>,
}

impl Site {
    pub fn page(&self, reference: &str, body: &str) {
        self.set(
            reference,
            FetchOutcome::Document(Document::new(reference, body.as_bytes().to_vec())),
        );
    }

    pub fn set(&self, reference: &str, outcome: FetchOutcome) {
        self.pages.lock().insert(reference.to_string(), outcome);
    }

    pub fn fetched(&self) -> Vec<String> {
        self.fetched.lock().clone()
    }
}

impl Fetcher for Site {
    fn fetch(&self, reference: &str) -> anyhow::Result<FetchOutcome> {
        self.fetched.lock().push(reference.to_string());
        match self.pages.lock().get(reference) {
            Some(outcome) => Ok(outcome.clone()),
            None => anyhow::bail!("connection refused: {}", reference),
        }
    }
}

/// Committer keeping every call it receives
#[derive(Default)]
pub struct Sink {
    pub added: Mutex<Vec<(String, Metadata)>>,
    pub removed: Mutex<Vec<String>>,
}

impl Sink {
    pub fn added_references(&self) -> Vec<String> {
        self.added.lock().iter().map(|(r, _)| r.clone()).collect()
    }

    pub fn removed_references(&self) -> Vec<String> {
        self.removed.lock().clone()
    }
}

impl Committer for Sink {
    fn add(&self, reference: &str, _content: &[u8], metadata: &Metadata) -> anyhow::Result<()> {
        self.added
            .lock()
            .push((reference.to_string(), metadata.clone()));
        Ok(())
    }

    fn remove(&self, reference: &str, _metadata: &Metadata) -> anyhow::Result<()> {
        self.removed.lock().push(reference.to_string());
        Ok(())
    }
}

/// One crawler setup whose runs share a work directory
pub struct TestCrawl {
    pub dir: TempDir,
    pub config: Config,
    pub site: Arc<Site>,
    pub sink: Arc<Sink>,
}

impl TestCrawl {
    pub fn new(data_store: DataStoreConfig, references: &[&str]) -> Self {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let mut config = Config::new("it", dir.path());
        config.data_store = data_store;
        config.crawler.start_references = references.iter().map(|r| r.to_string()).collect();
        Self {
            dir,
            config,
            site: Arc::new(Site::default()),
            sink: Arc::new(Sink::default()),
        }
    }

    pub fn crawler(&self) -> Crawler {
        Crawler::builder(self.config.clone())
            .fetcher(self.site.clone())
            .committer(self.sink.clone())
            .build()
            .expect("Failed to build crawler")
    }
}
