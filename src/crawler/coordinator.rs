//! Crawler coordinator - main crawl orchestration logic
//!
//! This module contains the crawl loop that ties the stores, the fetcher and
//! the document pipeline together:
//! - Binding the data-store engine to the run and deciding resume vs fresh
//! - Handing queued references to a bounded pool of blocking workers
//! - Finalizing every reference into the processed store
//! - Applying spoiled-reference strategies and orphan handling

use crate::checksum::{
    DocumentChecksummer, FieldsMetadataChecksummer, MetadataChecksummer, Sha256DocumentChecksummer,
};
use crate::committer::Committer;
use crate::config::{Config, DocumentChecksumKind, OrphansStrategy};
use crate::crawler::fetcher::{FetchOutcome, Fetcher};
use crate::crawler::monitor::{load_statistics, CrawlStatistics, EventCounter};
use crate::events::{CrawlerEvent, CrawlerEventKind, CrawlerEventListener, EventManager};
use crate::pipeline::{CrawlerServices, DocumentPipelineContext, Metadata, Pipeline};
use crate::reference::{normalize_reference, ReferenceStore, ResumePolicy};
use crate::spoiled::SpoiledReferenceStrategy;
use crate::state::{CrawlState, ReferenceRecord};
use crate::storage::{open_engine, DataStoreEngine, RunContext};
use crate::{ConfigError, LedgerError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};

/// Builds a `Crawler` from configuration and collaborators
pub struct CrawlerBuilder {
    config: Config,
    engine: Option<Arc<dyn DataStoreEngine>>,
    fetcher: Option<Arc<dyn Fetcher>>,
    committer: Option<Arc<dyn Committer>>,
    document_checksummer: Option<Arc<dyn DocumentChecksummer>>,
    metadata_checksummer: Option<Arc<dyn MetadataChecksummer>>,
    listeners: Vec<Arc<dyn CrawlerEventListener>>,
    pipeline: Option<Pipeline<DocumentPipelineContext>>,
    resume_policy: ResumePolicy,
}

impl CrawlerBuilder {
    pub fn new(config: Config) -> Self {
        Self {
            config,
            engine: None,
            fetcher: None,
            committer: None,
            document_checksummer: None,
            metadata_checksummer: None,
            listeners: Vec::new(),
            pipeline: None,
            resume_policy: ResumePolicy::Auto,
        }
    }

    /// Uses `engine` instead of the one configured under `[data-store]`
    pub fn engine(mut self, engine: Arc<dyn DataStoreEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    pub fn fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn committer(mut self, committer: Arc<dyn Committer>) -> Self {
        self.committer = Some(committer);
        self
    }

    /// Overrides the configured document checksummer
    pub fn document_checksummer(mut self, checksummer: Arc<dyn DocumentChecksummer>) -> Self {
        self.document_checksummer = Some(checksummer);
        self
    }

    /// Overrides the configured metadata checksummer
    pub fn metadata_checksummer(mut self, checksummer: Arc<dyn MetadataChecksummer>) -> Self {
        self.metadata_checksummer = Some(checksummer);
        self
    }

    pub fn add_listener(mut self, listener: Arc<dyn CrawlerEventListener>) -> Self {
        self.listeners.push(listener);
        self
    }

    /// Replaces the standard document pipeline
    pub fn pipeline(mut self, pipeline: Pipeline<DocumentPipelineContext>) -> Self {
        self.pipeline = Some(pipeline);
        self
    }

    pub fn resume_policy(mut self, policy: ResumePolicy) -> Self {
        self.resume_policy = policy;
        self
    }

    pub fn build(self) -> Result<Crawler> {
        let fetcher = self.fetcher.ok_or_else(|| {
            LedgerError::Config(ConfigError::Validation(
                "a fetcher is required to build a crawler".to_string(),
            ))
        })?;

        let engine = self
            .engine
            .unwrap_or_else(|| open_engine(&self.config.data_store));

        let document_checksummer = self.document_checksummer.or_else(|| {
            match self.config.checksum.document {
                DocumentChecksumKind::Sha256 => {
                    Some(Arc::new(Sha256DocumentChecksummer) as Arc<dyn DocumentChecksummer>)
                }
                DocumentChecksumKind::None => None,
            }
        });

        let metadata_checksummer = self.metadata_checksummer.or_else(|| {
            if self.config.checksum.metadata_fields.is_empty() {
                None
            } else {
                Some(Arc::new(FieldsMetadataChecksummer::new(
                    self.config.checksum.metadata_fields.clone(),
                )) as Arc<dyn MetadataChecksummer>)
            }
        });

        let events = Arc::new(EventManager::new());
        let counter = Arc::new(EventCounter::new());
        events.add_listener(counter.clone());
        for listener in self.listeners {
            events.add_listener(listener);
        }

        Ok(Crawler {
            config: Arc::new(self.config),
            engine,
            fetcher,
            committer: self.committer,
            document_checksummer,
            metadata_checksummer,
            events,
            counter,
            pipeline: Arc::new(
                self.pipeline
                    .unwrap_or_else(Pipeline::document_pipeline),
            ),
            resume_policy: self.resume_policy,
            stop: Arc::new(AtomicBool::new(false)),
        })
    }
}

/// Requests a running crawler to stop
///
/// References already being processed finish; the rest stay queued for the
/// next run to resume.
#[derive(Debug, Clone)]
pub struct CrawlerHandle {
    stop: Arc<AtomicBool>,
}

impl CrawlerHandle {
    pub fn stop(&self) {
        tracing::info!("Stop requested");
        self.stop.store(true, Ordering::SeqCst);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }
}

/// Main crawler structure
pub struct Crawler {
    config: Arc<Config>,
    engine: Arc<dyn DataStoreEngine>,
    fetcher: Arc<dyn Fetcher>,
    committer: Option<Arc<dyn Committer>>,
    document_checksummer: Option<Arc<dyn DocumentChecksummer>>,
    metadata_checksummer: Option<Arc<dyn MetadataChecksummer>>,
    events: Arc<EventManager>,
    counter: Arc<EventCounter>,
    pipeline: Arc<Pipeline<DocumentPipelineContext>>,
    resume_policy: ResumePolicy,
    stop: Arc<AtomicBool>,
}

impl Crawler {
    pub fn builder(config: Config) -> CrawlerBuilder {
        CrawlerBuilder::new(config)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn engine(&self) -> &Arc<dyn DataStoreEngine> {
        &self.engine
    }

    pub fn events(&self) -> &Arc<EventManager> {
        &self.events
    }

    pub fn handle(&self) -> CrawlerHandle {
        CrawlerHandle {
            stop: Arc::clone(&self.stop),
        }
    }

    fn run_context(&self) -> RunContext {
        RunContext::new(&self.config.crawler.id, &self.config.crawler.work_dir)
    }

    /// Wipes every store of this crawler
    pub fn clean(&self) -> Result<bool> {
        self.engine.init(&self.run_context())?;
        let result = self.engine.clean();
        let closed = self.engine.close();
        let cleaned = result?;
        closed?;
        if cleaned {
            tracing::info!("Cleaned data stores of crawler '{}'", self.config.crawler.id);
        }
        Ok(cleaned)
    }

    /// Runs the crawl until the queue is exhausted or a stop is requested
    ///
    /// The engine is bound to the run for the duration of the call and
    /// closed afterwards, even when the run fails.
    pub async fn run(&self) -> Result<CrawlStatistics> {
        self.stop.store(false, Ordering::SeqCst);
        self.engine.init(&self.run_context())?;

        let result = self.run_inner().await;

        if let Err(e) = self.engine.close() {
            tracing::error!("Failed to close data-store engine: {}", e);
            if result.is_ok() {
                return Err(e.into());
            }
        }
        result
    }

    async fn run_inner(&self) -> Result<CrawlStatistics> {
        let start_time = Instant::now();
        let crawler_id = self.config.crawler.id.clone();

        let reference_store = Arc::new(ReferenceStore::open(&self.engine, self.resume_policy)?);
        self.events
            .fire(CrawlerEvent::new(CrawlerEventKind::CrawlerStarted, &crawler_id));

        let services = Arc::new(CrawlerServices {
            crawler_id: crawler_id.clone(),
            config: Arc::clone(&self.config),
            events: Arc::clone(&self.events),
            reference_store: Arc::clone(&reference_store),
            document_checksummer: self.document_checksummer.clone(),
            metadata_checksummer: self.metadata_checksummer.clone(),
            committer: self.committer.clone(),
        });

        for reference in &self.config.crawler.start_references {
            let reference = normalize_reference(reference)?;
            if reference_store.queue(&ReferenceRecord::new(&reference))? {
                services.fire(CrawlerEventKind::ReferenceQueued, &reference);
            }
        }

        let mut processed = 0;
        loop {
            processed += self.process_queue(&services).await?;
            if self.is_stopped() {
                tracing::info!("Crawl stopped; the next run resumes where this one ended");
                break;
            }

            if !self.handle_orphans(&services)? {
                reference_store.complete()?;
                break;
            }
        }

        self.events.fire(
            CrawlerEvent::new(CrawlerEventKind::CrawlerFinished, &crawler_id)
                .with_message(format!("{} references processed", processed)),
        );

        let mut stats = load_statistics(self.engine.as_ref())?;
        stats.events = self.counter.snapshot();

        tracing::info!(
            "Crawl completed: {} references processed in {:?}",
            processed,
            start_time.elapsed()
        );
        Ok(stats)
    }

    fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::SeqCst)
    }

    /// Processes queued references until the queue is empty
    ///
    /// Returns the number of references processed.
    async fn process_queue(&self, services: &Arc<CrawlerServices>) -> Result<u64> {
        let num_threads = self.config.crawler.num_threads.max(1) as usize;
        let semaphore = Arc::new(Semaphore::new(num_threads));
        let mut tasks: JoinSet<Result<()>> = JoinSet::new();
        let mut dispatched = 0u64;
        let start_time = Instant::now();

        loop {
            while let Some(joined) = tasks.try_join_next() {
                worker_result(joined)?;
            }

            if self.is_stopped() {
                break;
            }

            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| LedgerError::Worker(e.to_string()))?;

            let Some(record) = services.reference_store.next_queued()? else {
                drop(permit);
                // Running workers never queue new references
                break;
            };

            let worker = Worker {
                services: Arc::clone(services),
                fetcher: Arc::clone(&self.fetcher),
                pipeline: Arc::clone(&self.pipeline),
            };
            tasks.spawn_blocking(move || {
                let _permit = permit;
                worker.process(record)
            });

            dispatched += 1;
            if dispatched % 10 == 0 {
                let rate = dispatched as f64 / start_time.elapsed().as_secs_f64().max(0.001);
                tracing::info!(
                    "Progress: {} references dispatched, {} queued, {:.2} references/sec",
                    dispatched,
                    services.reference_store.queue_size()?,
                    rate
                );
            }
        }

        while let Some(joined) = tasks.join_next().await {
            worker_result(joined)?;
        }

        Ok(dispatched)
    }

    /// Applies the orphans strategy
    ///
    /// Returns true if orphans were queued and the crawl loop must go on.
    fn handle_orphans(&self, services: &Arc<CrawlerServices>) -> Result<bool> {
        let store = &services.reference_store;
        let orphans = store.orphan_references()?;
        if orphans.is_empty() {
            return Ok(false);
        }

        let strategy = self.config.crawler.orphans_strategy;
        tracing::info!("Handling {} orphan references ({:?})", orphans.len(), strategy);

        match strategy {
            OrphansStrategy::Process => {
                let mut queued = false;
                for reference in orphans {
                    if store.queue(&ReferenceRecord::new(&reference))? {
                        services.fire(CrawlerEventKind::ReferenceQueued, &reference);
                        queued = true;
                    }
                }
                Ok(queued)
            }
            OrphansStrategy::Delete => {
                for reference in orphans {
                    let Some(cached) = store.get_cached(&reference)? else {
                        continue;
                    };
                    let mut record = cached.clone();
                    record.finalize(CrawlState::NotFound, Some(&cached));
                    delete_reference(services, &mut record);
                    store.processed(&record)?;
                }
                Ok(false)
            }
            OrphansStrategy::Ignore => {
                for reference in orphans {
                    if let Some(cached) = store.get_cached(&reference)? {
                        store.processed(&cached)?;
                    }
                }
                Ok(false)
            }
        }
    }
}

fn worker_result(joined: std::result::Result<Result<()>, JoinError>) -> Result<()> {
    joined.map_err(|e| LedgerError::Worker(e.to_string()))?
}

/// Everything a blocking worker needs to process one reference
struct Worker {
    services: Arc<CrawlerServices>,
    fetcher: Arc<dyn Fetcher>,
    pipeline: Arc<Pipeline<DocumentPipelineContext>>,
}

impl Worker {
    /// Fetches, runs the pipeline and finalizes one reference
    ///
    /// Per-reference failures end up as `CrawlState::Error`; only storage
    /// errors are returned.
    fn process(&self, record: ReferenceRecord) -> Result<()> {
        let store = &self.services.reference_store;
        let reference = record.reference.clone();
        let cached = store.get_cached(&reference)?;
        tracing::debug!("Processing reference: {}", reference);

        let outcome = match self.fetcher.fetch(&reference) {
            Ok(outcome) => outcome,
            Err(e) => {
                let error = LedgerError::Fetch {
                    reference: reference.clone(),
                    source: e,
                };
                tracing::error!("{}", error);
                return self.finalize_spoiled(
                    record,
                    cached,
                    CrawlState::Error,
                    Some(error.to_string()),
                );
            }
        };

        let mut document = match outcome {
            FetchOutcome::Document(document) => document,
            FetchOutcome::BadStatus(status) => {
                return self.finalize_spoiled(
                    record,
                    cached,
                    CrawlState::BadStatus,
                    Some(format!("status {}", status)),
                );
            }
            FetchOutcome::NotFound => {
                return self.finalize_spoiled(record, cached, CrawlState::NotFound, None);
            }
        };
        if document.reference.is_empty() {
            document.reference = reference.clone();
        }

        let mut context = DocumentPipelineContext::new(
            document,
            record,
            cached,
            Arc::clone(&self.services),
        );

        match self.pipeline.execute(&mut context) {
            Ok(true) => {
                let state = context.record.state.unwrap_or(CrawlState::New);
                let mut record = context.record;
                record.finalize(state, context.cached.as_ref());
                store.processed(&record)?;
            }
            Ok(false) => {
                // Stopped before any state was resolved: a reference never
                // seen before stays new, without checksums
                let state = context.record.state.unwrap_or(if context.cached.is_some() {
                    CrawlState::Unmodified
                } else {
                    CrawlState::New
                });
                let mut record = context.record;
                carry_forward_checksums(&mut record, context.cached.as_ref());
                if state.is_spoiled() {
                    return self.finalize_spoiled(record, context.cached, state, None);
                }
                record.finalize(state, context.cached.as_ref());
                store.processed(&record)?;
            }
            Err(e) => {
                tracing::error!("Pipeline failed for {}: {}", reference, e);
                return self.finalize_spoiled(
                    context.record,
                    context.cached,
                    CrawlState::Error,
                    Some(e.to_string()),
                );
            }
        }
        Ok(())
    }

    /// Records an invalid outcome and applies the spoiled-reference strategy
    fn finalize_spoiled(
        &self,
        mut record: ReferenceRecord,
        cached: Option<ReferenceRecord>,
        state: CrawlState,
        message: Option<String>,
    ) -> Result<()> {
        let services = &self.services;
        let reference = record.reference.clone();

        carry_forward_checksums(&mut record, cached.as_ref());
        record.finalize(state, cached.as_ref());

        if let Some(kind) = CrawlerEventKind::rejection_for(state) {
            let mut event =
                CrawlerEvent::new(kind, &services.crawler_id).with_reference(&reference);
            if let Some(message) = message {
                event = event.with_message(message);
            }
            services.events.fire(event);
        }

        if ReferenceStore::is_vanished(&record, cached.as_ref()) {
            services.fire(CrawlerEventKind::ReferenceVanished, &reference);
        }

        let strategy = services.config.spoiled_references.strategy_for(state);
        match strategy {
            SpoiledReferenceStrategy::Ignore => {
                tracing::debug!("Ignoring spoiled reference {} ({})", reference, state);
            }
            SpoiledReferenceStrategy::Delete => delete_reference(services, &mut record),
            SpoiledReferenceStrategy::GraceOnce => {
                let previously_spoiled = cached
                    .as_ref()
                    .map(|c| c.was_previously_spoiled())
                    .unwrap_or(false);
                if previously_spoiled {
                    delete_reference(services, &mut record);
                } else {
                    services.fire(CrawlerEventKind::ReferenceGraced, &reference);
                }
            }
        }

        services.reference_store.processed(&record)?;
        Ok(())
    }
}

/// Keeps the checksums of the last committed version on a record that was
/// not committed in this run
fn carry_forward_checksums(record: &mut ReferenceRecord, cached: Option<&ReferenceRecord>) {
    record.content_checksum = cached.and_then(|c| c.content_checksum.clone());
    record.metadata_checksum = cached.and_then(|c| c.metadata_checksum.clone());
}

/// Asks the committer to remove a reference
///
/// Checksums are cleared so that the reference is new if it comes back.
fn delete_reference(services: &CrawlerServices, record: &mut ReferenceRecord) {
    record.content_checksum = None;
    record.metadata_checksum = None;

    if let Some(committer) = &services.committer {
        if let Err(source) = committer.remove(&record.reference, &Metadata::new()) {
            let error = LedgerError::Commit {
                reference: record.reference.clone(),
                source,
            };
            tracing::error!("{}", error);
            return;
        }
    }
    services.fire(CrawlerEventKind::DocumentCommittedRemove, &record.reference);
}
