//! Interrupted runs and resumption

use crate::common::{engines, TestCrawl};
use fetch_stop::stopping_fetcher;
use std::collections::BTreeMap;
use sumi_ledger::config::OrphansStrategy;
use sumi_ledger::reference::{
    ResumePolicy, RunState, CACHED_STORE, PROCESSED_STORE, QUEUED_STORE, RUN_STATE_STORE,
};
use sumi_ledger::storage::{open_engine, RunContext};
use sumi_ledger::{CrawlState, Crawler, DataStoreEngineExt, ReferenceRecord, ReferenceStore};

const REFERENCES: [&str; 6] = [
    "https://example.com/1",
    "https://example.com/2",
    "https://example.com/3",
    "https://example.com/4",
    "https://example.com/5",
    "https://example.com/6",
];

mod fetch_stop {
    use crate::common::Site;
    use parking_lot::Mutex;
    use std::sync::Arc;
    use sumi_ledger::crawler::{CrawlerHandle, FetchOutcome, Fetcher};

    /// Wraps `site` so that fetching `trigger` requests a stop
    pub fn stopping_fetcher(
        site: Arc<Site>,
        trigger: &'static str,
    ) -> (Arc<dyn Fetcher>, Arc<Mutex<Option<CrawlerHandle>>>) {
        let slot: Arc<Mutex<Option<CrawlerHandle>>> = Arc::new(Mutex::new(None));
        let handle = Arc::clone(&slot);
        let fetcher = move |reference: &str| -> anyhow::Result<FetchOutcome> {
            if reference == trigger {
                if let Some(handle) = handle.lock().as_ref() {
                    handle.stop();
                }
            }
            site.fetch(reference)
        };
        (Arc::new(fetcher), slot)
    }
}

fn snapshot(crawl: &TestCrawl, store: &str) -> BTreeMap<String, ReferenceRecord> {
    let engine = open_engine(&crawl.config.data_store);
    engine
        .init(&RunContext::new(&crawl.config.crawler.id, crawl.dir.path()))
        .unwrap();

    let mut records = BTreeMap::new();
    if engine.store_type(store).unwrap().is_some() {
        engine
            .open_store::<ReferenceRecord>(store)
            .unwrap()
            .for_each(|key, record| {
                records.insert(key.to_string(), record);
                Ok(true)
            })
            .unwrap();
    }
    engine.close().unwrap();
    records
}

/// Marker left by an unfinished run, if any
fn run_marker(crawl: &TestCrawl) -> Option<RunState> {
    let engine = open_engine(&crawl.config.data_store);
    engine
        .init(&RunContext::new(&crawl.config.crawler.id, crawl.dir.path()))
        .unwrap();
    let marker = match engine.store_type(RUN_STATE_STORE).unwrap() {
        Some(_) => engine
            .open_store::<RunState>(RUN_STATE_STORE)
            .unwrap()
            .find_first()
            .unwrap()
            .map(|(_, state)| state),
        None => None,
    };
    engine.close().unwrap();
    marker
}

fn setup(data_store: sumi_ledger::config::DataStoreConfig) -> TestCrawl {
    let mut crawl = TestCrawl::new(data_store, &REFERENCES);
    crawl.config.crawler.num_threads = 1;
    for (i, reference) in REFERENCES.iter().enumerate() {
        crawl.site.page(reference, &format!("page {}", i));
    }
    crawl
}

/// Runs a crawl that stops itself while fetching the first reference
async fn interrupted_run(crawl: &TestCrawl) {
    let (fetcher, slot) = stopping_fetcher(crawl.site.clone(), REFERENCES[0]);
    let crawler = Crawler::builder(crawl.config.clone())
        .fetcher(fetcher)
        .committer(crawl.sink.clone())
        .build()
        .unwrap();
    *slot.lock() = Some(crawler.handle());

    let stats = crawler.run().await.unwrap();
    assert!(crawler.handle().is_stopped());
    assert!(stats.monitor.processed_count >= 1);
    assert!(stats.monitor.processed_count < REFERENCES.len() as u64);
    assert!(stats.monitor.queue_size > 0);
    assert_eq!(stats.monitor.active_count, 0);
}

#[tokio::test]
async fn test_interrupted_run_resumes() {
    for data_store in engines() {
        let crawl = setup(data_store);
        interrupted_run(&crawl).await;

        let before = snapshot(&crawl, PROCESSED_STORE);
        assert!(!before.is_empty());
        assert!(!snapshot(&crawl, QUEUED_STORE).is_empty());

        let stats = crawl.crawler().run().await.unwrap();
        assert_eq!(stats.monitor.processed_count, REFERENCES.len() as u64);
        assert_eq!(stats.monitor.queue_size, 0);
        assert_eq!(
            stats.processed_by_state.get(&CrawlState::New),
            Some(&(REFERENCES.len() as u64))
        );

        // Every reference committed exactly once across both runs
        let mut added = crawl.sink.added_references();
        added.sort();
        assert_eq!(added, REFERENCES.iter().map(|r| r.to_string()).collect::<Vec<_>>());

        let after = snapshot(&crawl, PROCESSED_STORE);
        for (reference, record) in before {
            assert_eq!(after.get(&reference), Some(&record));
        }
    }
}

#[tokio::test]
async fn test_fresh_policy_discards_interrupted_run() {
    for data_store in engines() {
        let crawl = setup(data_store);
        interrupted_run(&crawl).await;
        let first_run = snapshot(&crawl, PROCESSED_STORE);

        let crawler = Crawler::builder(crawl.config.clone())
            .fetcher(crawl.site.clone())
            .committer(crawl.sink.clone())
            .resume_policy(ResumePolicy::Fresh)
            .build()
            .unwrap();
        let stats = crawler.run().await.unwrap();

        assert_eq!(stats.monitor.processed_count, REFERENCES.len() as u64);
        assert_eq!(
            stats.processed_by_state.get(&CrawlState::Unmodified),
            Some(&(first_run.len() as u64))
        );
        assert_eq!(snapshot(&crawl, CACHED_STORE), first_run);
    }
}

#[tokio::test]
async fn test_reinit_after_interruption_preserves_records() {
    for data_store in engines() {
        let crawl = setup(data_store);
        interrupted_run(&crawl).await;

        let processed = snapshot(&crawl, PROCESSED_STORE);
        let queued = snapshot(&crawl, QUEUED_STORE);
        assert!(processed
            .values()
            .all(|r| r.state == Some(CrawlState::New) && r.content_checksum.is_some()));
        assert_eq!(processed.len() + queued.len(), REFERENCES.len());

        // Re-init without clean and reopen the reference stores
        let engine = open_engine(&crawl.config.data_store);
        engine
            .init(&RunContext::new(&crawl.config.crawler.id, crawl.dir.path()))
            .unwrap();
        let store = ReferenceStore::open(&engine, ResumePolicy::Auto).unwrap();
        assert!(store.is_resumed());
        assert_eq!(store.queue_size().unwrap(), queued.len() as u64);
        assert_eq!(store.processed_count().unwrap(), processed.len() as u64);
        drop(store);
        engine.close().unwrap();

        assert_eq!(snapshot(&crawl, PROCESSED_STORE), processed);
        assert_eq!(snapshot(&crawl, QUEUED_STORE), queued);
    }
}

#[tokio::test]
async fn test_stop_after_queue_drained_keeps_orphans() {
    for data_store in engines() {
        let mut crawl = setup(data_store);
        crawl.config.crawler.start_references =
            REFERENCES[..2].iter().map(|r| r.to_string()).collect();
        crawl.crawler().run().await.unwrap();

        // Only the first reference is left; stop while it is the last in flight
        crawl.config.crawler.start_references = vec![REFERENCES[0].to_string()];
        crawl.config.crawler.orphans_strategy = OrphansStrategy::Delete;
        let (fetcher, slot) = stopping_fetcher(crawl.site.clone(), REFERENCES[0]);
        let crawler = Crawler::builder(crawl.config.clone())
            .fetcher(fetcher)
            .committer(crawl.sink.clone())
            .build()
            .unwrap();
        *slot.lock() = Some(crawler.handle());
        let stats = crawler.run().await.unwrap();
        assert_eq!(stats.monitor.queue_size, 0);
        assert_eq!(stats.monitor.processed_count, 1);
        assert!(crawl.sink.removed_references().is_empty());
        assert!(run_marker(&crawl).is_some());

        let stats = crawl.crawler().run().await.unwrap();
        assert_eq!(crawl.sink.removed_references(), vec![REFERENCES[1].to_string()]);
        assert_eq!(stats.processed_by_state.get(&CrawlState::NotFound), Some(&1));
        assert_eq!(run_marker(&crawl), None);

        // The next run starts fresh from a complete previous run
        crawl.crawler().run().await.unwrap();
        assert_eq!(snapshot(&crawl, CACHED_STORE).len(), 2);
    }
}
