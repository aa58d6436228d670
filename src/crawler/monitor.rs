//! Crawl monitoring and statistics
//!
//! `CrawlerMonitor` is a point-in-time snapshot of the reference stores;
//! `EventCounter` tallies crawler events as a run goes.

use crate::events::{CrawlerEvent, CrawlerEventKind, CrawlerEventListener};
use crate::reference::{
    ReferenceStore, ACTIVE_STORE, CACHED_STORE, PROCESSED_STORE, QUEUED_STORE,
};
use crate::state::{CrawlState, ReferenceRecord};
use crate::storage::{DataStoreEngine, DataStoreEngineExt, StorageResult};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap};

/// Reference counters of a crawler
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlerMonitor {
    pub processed_count: u64,
    pub queue_size: u64,
    pub active_count: u64,
    pub cached_count: u64,
}

impl CrawlerMonitor {
    /// Captures the counters of a running crawler
    pub fn capture(store: &ReferenceStore) -> StorageResult<Self> {
        Ok(Self {
            processed_count: store.processed_count()?,
            queue_size: store.queue_size()?,
            active_count: store.active_count()?,
            cached_count: store.cached_count()?,
        })
    }

    /// Reads the counters from an engine without starting a run
    pub fn from_engine(engine: &dyn DataStoreEngine) -> StorageResult<Self> {
        Ok(Self {
            processed_count: count_if_present(engine, PROCESSED_STORE)?,
            queue_size: count_if_present(engine, QUEUED_STORE)?,
            active_count: count_if_present(engine, ACTIVE_STORE)?,
            cached_count: count_if_present(engine, CACHED_STORE)?,
        })
    }
}

fn count_if_present(engine: &dyn DataStoreEngine, name: &str) -> StorageResult<u64> {
    if engine.store_type(name)?.is_none() {
        return Ok(0);
    }
    engine.open_store::<ReferenceRecord>(name)?.count()
}

/// Counts events by kind
#[derive(Debug, Default)]
pub struct EventCounter {
    counts: Mutex<HashMap<CrawlerEventKind, u64>>,
}

impl EventCounter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, kind: CrawlerEventKind) -> u64 {
        self.counts.lock().get(&kind).copied().unwrap_or(0)
    }

    /// Counts keyed by event name, sorted
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        self.counts
            .lock()
            .iter()
            .map(|(kind, count)| (kind.as_str().to_string(), *count))
            .collect()
    }
}

impl CrawlerEventListener for EventCounter {
    fn on_event(&self, event: &CrawlerEvent) {
        *self.counts.lock().entry(event.kind).or_insert(0) += 1;
    }
}

/// Crawl statistics summary
#[derive(Debug, Clone, Default, Serialize)]
pub struct CrawlStatistics {
    pub monitor: CrawlerMonitor,

    /// Processed references by final state
    pub processed_by_state: BTreeMap<CrawlState, u64>,

    /// References whose last outcome was spoiled, counting this run
    pub spoiled_references: u64,

    /// Event counts of the run, when one was observed
    pub events: BTreeMap<String, u64>,
}

/// Loads statistics from an engine's reference stores
///
/// Falls back to the cached store when nothing has been processed yet in
/// the current run.
pub fn load_statistics(engine: &dyn DataStoreEngine) -> StorageResult<CrawlStatistics> {
    let monitor = CrawlerMonitor::from_engine(engine)?;

    let source = if monitor.processed_count > 0 {
        PROCESSED_STORE
    } else {
        CACHED_STORE
    };

    let mut processed_by_state = BTreeMap::new();
    let mut spoiled_references = 0;

    if engine.store_type(source)?.is_some() {
        engine
            .open_store::<ReferenceRecord>(source)?
            .for_each(|_, record| {
                if let Some(state) = record.state {
                    *processed_by_state.entry(state).or_insert(0) += 1;
                }
                if record.was_previously_spoiled() {
                    spoiled_references += 1;
                }
                Ok(true)
            })?;
    }

    Ok(CrawlStatistics {
        monitor,
        processed_by_state,
        spoiled_references,
        events: BTreeMap::new(),
    })
}

/// Prints statistics to stdout in a formatted manner
pub fn print_statistics(stats: &CrawlStatistics) {
    println!("=== Crawl Statistics ===\n");

    println!("References:");
    println!("  Processed: {}", stats.monitor.processed_count);
    println!("  Queued: {}", stats.monitor.queue_size);
    println!("  Active: {}", stats.monitor.active_count);
    println!("  Cached from previous run: {}", stats.monitor.cached_count);
    println!();

    let total: u64 = stats.processed_by_state.values().sum();
    if total > 0 {
        println!("References by State:");
        for (state, count) in &stats.processed_by_state {
            let percentage = (*count as f64 / total as f64) * 100.0;
            println!("  {}: {} ({:.1}%)", state, count, percentage);
        }
        println!();
    }

    if stats.spoiled_references > 0 {
        println!("Spoiled references: {}", stats.spoiled_references);
        println!();
    }

    if !stats.events.is_empty() {
        println!("Events:");
        for (event, count) in &stats.events {
            println!("  {}: {}", event, count);
        }
        println!();
    }

    let valid: u64 = stats
        .processed_by_state
        .iter()
        .filter(|(state, _)| state.is_valid())
        .map(|(_, count)| *count)
        .sum();
    let success_rate = if total > 0 {
        (valid as f64 / total as f64) * 100.0
    } else {
        0.0
    };

    println!(
        "Success Rate: {:.1}% ({} / {} references valid)",
        success_rate, valid, total
    );
}
