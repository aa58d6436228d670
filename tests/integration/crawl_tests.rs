//! End-to-end crawl behavior across runs

use crate::common::{engines, TestCrawl};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use sumi_ledger::config::{DocumentChecksumKind, OrphansStrategy};
use sumi_ledger::crawler::FetchOutcome;
use sumi_ledger::pipeline::{
    CommitModuleStage, DocumentChecksumStage, DocumentPipelineContext, Pipeline, PipelineStage,
    DOCUMENT_CHECKSUM_FIELD,
};
use sumi_ledger::reference::PROCESSED_STORE;
use sumi_ledger::storage::{open_engine, RunContext};
use sumi_ledger::{CrawlState, DataStoreEngineExt, ReferenceRecord};

const A: &str = "https://example.com/a";
const B: &str = "https://example.com/b";

/// Reads the processed record of `reference` from a closed crawl
fn processed_record(crawl: &TestCrawl, reference: &str) -> Option<ReferenceRecord> {
    let engine = open_engine(&crawl.config.data_store);
    engine
        .init(&RunContext::new(&crawl.config.crawler.id, crawl.dir.path()))
        .unwrap();
    let record = engine
        .open_store::<ReferenceRecord>(PROCESSED_STORE)
        .unwrap()
        .find(reference)
        .unwrap();
    engine.close().unwrap();
    record
}

#[tokio::test]
async fn test_document_lifecycle_across_runs() {
    for data_store in engines() {
        let crawl = TestCrawl::new(data_store, &[A]);
        crawl.site.page(A, "first");

        let stats = crawl.crawler().run().await.unwrap();
        assert_eq!(stats.processed_by_state.get(&CrawlState::New), Some(&1));

        let stats = crawl.crawler().run().await.unwrap();
        assert_eq!(stats.processed_by_state.get(&CrawlState::Unmodified), Some(&1));
        assert_eq!(stats.events.get("REJECTED_UNMODIFIED"), Some(&1));

        crawl.site.page(A, "second");
        let stats = crawl.crawler().run().await.unwrap();
        assert_eq!(stats.processed_by_state.get(&CrawlState::Modified), Some(&1));

        assert_eq!(crawl.sink.added_references(), vec![A.to_string(), A.to_string()]);
        let checksums: Vec<_> = crawl
            .sink
            .added
            .lock()
            .iter()
            .map(|(_, metadata)| metadata.get(DOCUMENT_CHECKSUM_FIELD).map(String::from))
            .collect();
        assert!(checksums.iter().all(Option::is_some));
        assert_ne!(checksums[0], checksums[1]);
    }
}

#[tokio::test]
async fn test_document_without_checksummer_is_new() {
    for data_store in engines() {
        let mut crawl = TestCrawl::new(data_store, &[A]);
        crawl.config.checksum.document = DocumentChecksumKind::None;
        crawl.site.page(A, "body");

        let stats = crawl.crawler().run().await.unwrap();
        assert_eq!(stats.processed_by_state.get(&CrawlState::New), Some(&1));

        let added = crawl.sink.added.lock();
        assert_eq!(added.len(), 1);
        assert!(!added[0].1.contains_key(DOCUMENT_CHECKSUM_FIELD));
        drop(added);

        let record = processed_record(&crawl, A).unwrap();
        assert_eq!(record.state, Some(CrawlState::New));
        assert_eq!(record.content_checksum, None);
    }
}

/// Stage that counts its runs and returns a fixed outcome
struct Counting {
    name: &'static str,
    outcome: bool,
    runs: Arc<AtomicUsize>,
}

impl PipelineStage<DocumentPipelineContext> for Counting {
    fn name(&self) -> &str {
        self.name
    }

    fn execute(&self, _context: &mut DocumentPipelineContext) -> sumi_ledger::Result<bool> {
        self.runs.fetch_add(1, Ordering::SeqCst);
        Ok(self.outcome)
    }
}

#[tokio::test]
async fn test_stopping_stage_prevents_commit() {
    let crawl = TestCrawl::new(engines().remove(0), &[A, B]);
    crawl.site.page(A, "a");
    crawl.site.page(B, "b");

    let first = Arc::new(AtomicUsize::new(0));
    let later = Arc::new(AtomicUsize::new(0));
    let pipeline = Pipeline::new()
        .add_stage(Counting {
            name: "stop",
            outcome: false,
            runs: Arc::clone(&first),
        })
        .add_stage(Counting {
            name: "after",
            outcome: true,
            runs: Arc::clone(&later),
        })
        .add_stage(DocumentChecksumStage)
        .add_stage(CommitModuleStage);

    let crawler = sumi_ledger::Crawler::builder(crawl.config.clone())
        .fetcher(crawl.site.clone())
        .committer(crawl.sink.clone())
        .pipeline(pipeline)
        .build()
        .unwrap();
    let stats = crawler.run().await.unwrap();

    assert_eq!(first.load(Ordering::SeqCst), 2);
    assert_eq!(later.load(Ordering::SeqCst), 0);
    assert!(crawl.sink.added_references().is_empty());
    assert_eq!(stats.events.get("DOCUMENT_COMMITTED_ADD"), None);
    // Never seen before, so not unmodified
    assert_eq!(stats.processed_by_state.get(&CrawlState::New), Some(&2));
    let record = processed_record(&crawl, A).unwrap();
    assert_eq!(record.content_checksum, None);

    // Known from the previous run this time
    let stats = crawler.run().await.unwrap();
    assert_eq!(stats.processed_by_state.get(&CrawlState::Unmodified), Some(&2));
    assert!(crawl.sink.added_references().is_empty());
}

#[tokio::test]
async fn test_bad_status_is_graced_once_then_deleted() {
    for data_store in engines() {
        let crawl = TestCrawl::new(data_store, &[A]);
        crawl.site.page(A, "a");
        crawl.crawler().run().await.unwrap();

        crawl.site.set(A, FetchOutcome::BadStatus(503));
        let stats = crawl.crawler().run().await.unwrap();
        assert_eq!(stats.events.get("REFERENCE_GRACED"), Some(&1));
        assert_eq!(stats.events.get("REFERENCE_VANISHED"), Some(&1));
        assert!(crawl.sink.removed_references().is_empty());

        let graced = processed_record(&crawl, A).unwrap();
        assert_eq!(graced.state, Some(CrawlState::BadStatus));
        assert!(graced.content_checksum.is_some());

        let stats = crawl.crawler().run().await.unwrap();
        assert_eq!(stats.events.get("REFERENCE_GRACED"), None);
        assert_eq!(stats.events.get("DOCUMENT_COMMITTED_REMOVE"), Some(&1));
        // Already invalid in the previous run
        assert_eq!(stats.events.get("REFERENCE_VANISHED"), None);
        assert_eq!(crawl.sink.removed_references(), vec![A.to_string()]);

        crawl.site.page(A, "a");
        let stats = crawl.crawler().run().await.unwrap();
        assert_eq!(stats.processed_by_state.get(&CrawlState::New), Some(&1));
        assert_eq!(crawl.sink.added_references().len(), 2);
    }
}

#[tokio::test]
async fn test_not_found_is_deleted_immediately() {
    for data_store in engines() {
        let crawl = TestCrawl::new(data_store, &[A]);
        crawl.site.page(A, "a");
        crawl.crawler().run().await.unwrap();

        crawl.site.set(A, FetchOutcome::NotFound);
        let stats = crawl.crawler().run().await.unwrap();

        assert_eq!(stats.processed_by_state.get(&CrawlState::NotFound), Some(&1));
        assert_eq!(stats.events.get("REJECTED_NOTFOUND"), Some(&1));
        assert_eq!(stats.events.get("REFERENCE_VANISHED"), Some(&1));
        assert_eq!(crawl.sink.removed_references(), vec![A.to_string()]);
    }
}

#[tokio::test]
async fn test_orphans_are_processed() {
    for data_store in engines() {
        let mut crawl = TestCrawl::new(data_store, &[A, B]);
        crawl.site.page(A, "a");
        crawl.site.page(B, "b");
        crawl.crawler().run().await.unwrap();

        crawl.config.crawler.start_references = vec![A.to_string()];
        crawl.config.crawler.orphans_strategy = OrphansStrategy::Process;
        let stats = crawl.crawler().run().await.unwrap();

        assert_eq!(stats.monitor.processed_count, 2);
        assert_eq!(stats.processed_by_state.get(&CrawlState::Unmodified), Some(&2));
        let fetched_b = crawl.site.fetched().iter().filter(|r| *r == B).count();
        assert_eq!(fetched_b, 2);
    }
}

#[tokio::test]
async fn test_orphans_are_deleted() {
    for data_store in engines() {
        let mut crawl = TestCrawl::new(data_store, &[A, B]);
        crawl.site.page(A, "a");
        crawl.site.page(B, "b");
        crawl.crawler().run().await.unwrap();

        crawl.config.crawler.start_references = vec![A.to_string()];
        crawl.config.crawler.orphans_strategy = OrphansStrategy::Delete;
        let stats = crawl.crawler().run().await.unwrap();

        assert_eq!(crawl.sink.removed_references(), vec![B.to_string()]);
        assert_eq!(stats.events.get("DOCUMENT_COMMITTED_REMOVE"), Some(&1));
        let fetched_b = crawl.site.fetched().iter().filter(|r| *r == B).count();
        assert_eq!(fetched_b, 1);

        let record = processed_record(&crawl, B).unwrap();
        assert_eq!(record.state, Some(CrawlState::NotFound));
        assert_eq!(record.content_checksum, None);
    }
}

#[tokio::test]
async fn test_orphans_are_ignored() {
    for data_store in engines() {
        let mut crawl = TestCrawl::new(data_store, &[A, B]);
        crawl.site.page(A, "a");
        crawl.site.page(B, "b");
        crawl.crawler().run().await.unwrap();
        let before = processed_record(&crawl, B).unwrap();

        crawl.config.crawler.start_references = vec![A.to_string()];
        crawl.config.crawler.orphans_strategy = OrphansStrategy::Ignore;
        crawl.crawler().run().await.unwrap();

        assert!(crawl.sink.removed_references().is_empty());
        assert_eq!(processed_record(&crawl, B), Some(before));
    }
}

#[tokio::test]
async fn test_metadata_checksum_skips_unchanged_documents() {
    for data_store in engines() {
        let mut crawl = TestCrawl::new(data_store, &[A]);
        crawl.config.checksum.metadata_fields = vec!["ETag".to_string()];

        let mut metadata = sumi_ledger::pipeline::Metadata::new();
        metadata.set("ETag", "v1");
        let document = sumi_ledger::pipeline::Document::new(A, b"one".to_vec())
            .with_metadata(metadata);
        crawl.site.set(A, FetchOutcome::Document(document.clone()));
        crawl.crawler().run().await.unwrap();

        // Same ETag, different body: the metadata checksum wins
        let mut changed = document;
        changed.content = b"two".to_vec();
        crawl.site.set(A, FetchOutcome::Document(changed));
        let stats = crawl.crawler().run().await.unwrap();

        assert_eq!(stats.processed_by_state.get(&CrawlState::Unmodified), Some(&1));
        assert_eq!(crawl.sink.added_references().len(), 1);
    }
}
