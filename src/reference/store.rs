use crate::state::ReferenceRecord;
use crate::storage::{DataStore, DataStoreEngine, DataStoreEngineExt, StorageResult};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub const QUEUED_STORE: &str = "queued";
pub const ACTIVE_STORE: &str = "active";
pub const PROCESSED_STORE: &str = "processed";
pub const CACHED_STORE: &str = "cached";
pub const RUN_STATE_STORE: &str = "run-state";

const CURRENT_RUN: &str = "current";

/// Marker of a run that has not finished its bookkeeping yet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunState {
    pub started_at: DateTime<Utc>,

    /// Number of times this run was resumed
    #[serde(default)]
    pub resumes: u32,
}

/// How `ReferenceStore::open` treats stores left by an earlier run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResumePolicy {
    /// Resume when the previous run did not finish
    #[default]
    Auto,

    /// Always start a fresh run
    Fresh,
}

/// Reference lifecycle bookkeeping for one crawler
///
/// A reference moves `queued` -> `active` -> `processed` within a run. The
/// `cached` store holds what the previous completed run processed and is only
/// read during a run.
pub struct ReferenceStore {
    queued: DataStore<ReferenceRecord>,
    active: DataStore<ReferenceRecord>,
    processed: DataStore<ReferenceRecord>,
    cached: DataStore<ReferenceRecord>,
    run_state: DataStore<RunState>,
    resumed: bool,
    // Serializes moves between stores
    transition: Mutex<()>,
}

impl ReferenceStore {
    /// Opens the reference stores on an initialized engine
    ///
    /// A previous run is unfinished while it left queued or active
    /// references, or while its run marker is still set (it stopped after
    /// draining the queue but before handling orphans). On resume, references
    /// that were active when the previous run stopped go back to the queue.
    /// On a fresh run, the previous `processed` store becomes the new
    /// `cached` store.
    pub fn open(engine: &Arc<dyn DataStoreEngine>, policy: ResumePolicy) -> StorageResult<Self> {
        let queued = engine.open_store::<ReferenceRecord>(QUEUED_STORE)?;
        let active = engine.open_store::<ReferenceRecord>(ACTIVE_STORE)?;
        let mut processed = engine.open_store::<ReferenceRecord>(PROCESSED_STORE)?;

        let run_state = engine.open_store::<RunState>(RUN_STATE_STORE)?;

        let unfinished = run_state.find(CURRENT_RUN)?;
        let interrupted = unfinished.is_some() || !queued.is_empty()? || !active.is_empty()?;
        let resumed = policy == ResumePolicy::Auto && interrupted;

        if resumed {
            let mut requeued = 0;
            active.for_each(|key, record| {
                queued.save(key, &record)?;
                requeued += 1;
                Ok(true)
            })?;
            active.clear()?;
            tracing::info!(
                "Resuming previous run: {} queued, {} returned from active",
                queued.count()?,
                requeued
            );
        } else {
            engine.drop_store(CACHED_STORE)?;
            engine.rename_store(&processed, CACHED_STORE)?;
            processed = engine.open_store::<ReferenceRecord>(PROCESSED_STORE)?;
            queued.clear()?;
            active.clear()?;
            tracing::info!("Starting fresh run");
        }

        let marker = match unfinished.filter(|_| resumed) {
            Some(previous) => RunState {
                resumes: previous.resumes + 1,
                ..previous
            },
            None => RunState {
                started_at: Utc::now(),
                resumes: 0,
            },
        };
        run_state.save(CURRENT_RUN, &marker)?;

        let cached = engine.open_store::<ReferenceRecord>(CACHED_STORE)?;

        Ok(Self {
            queued,
            active,
            processed,
            cached,
            run_state,
            resumed,
            transition: Mutex::new(()),
        })
    }

    /// Marks the run as finished
    ///
    /// Called once the queue is drained and orphans are handled; the next
    /// run then starts fresh.
    pub fn complete(&self) -> StorageResult<()> {
        self.run_state.delete(CURRENT_RUN)?;
        Ok(())
    }

    /// Marker of the current run
    pub fn run_state(&self) -> StorageResult<Option<RunState>> {
        self.run_state.find(CURRENT_RUN)
    }

    /// Whether this run continues an interrupted one
    pub fn is_resumed(&self) -> bool {
        self.resumed
    }

    /// Queues a reference for processing
    ///
    /// Returns false if the reference is already queued, active or processed
    /// in this run.
    pub fn queue(&self, record: &ReferenceRecord) -> StorageResult<bool> {
        let _guard = self.transition.lock();
        let key = record.reference.as_str();

        if self.queued.exists(key)? || self.active.exists(key)? || self.processed.exists(key)? {
            return Ok(false);
        }

        self.queued.save(key, record)?;
        Ok(true)
    }

    /// Takes the next queued reference and marks it active
    pub fn next_queued(&self) -> StorageResult<Option<ReferenceRecord>> {
        let _guard = self.transition.lock();

        let Some((key, record)) = self.queued.find_first()? else {
            return Ok(None);
        };

        self.active.save(&key, &record)?;
        self.queued.delete(&key)?;
        Ok(Some(record))
    }

    /// Records the final outcome of a reference for this run
    pub fn processed(&self, record: &ReferenceRecord) -> StorageResult<()> {
        let _guard = self.transition.lock();
        let key = record.reference.as_str();

        self.processed.save(key, record)?;
        self.active.delete(key)?;
        self.queued.delete(key)?;
        Ok(())
    }

    /// Gets the record the previous run left for `reference`
    pub fn get_cached(&self, reference: &str) -> StorageResult<Option<ReferenceRecord>> {
        self.cached.find(reference)
    }

    pub fn is_processed(&self, reference: &str) -> StorageResult<bool> {
        self.processed.exists(reference)
    }

    pub fn is_queue_empty(&self) -> StorageResult<bool> {
        self.queued.is_empty()
    }

    pub fn queue_size(&self) -> StorageResult<u64> {
        self.queued.count()
    }

    pub fn active_count(&self) -> StorageResult<u64> {
        self.active.count()
    }

    pub fn processed_count(&self) -> StorageResult<u64> {
        self.processed.count()
    }

    pub fn cached_count(&self) -> StorageResult<u64> {
        self.cached.count()
    }

    /// Cached references that have not been processed in this run
    pub fn orphan_references(&self) -> StorageResult<Vec<String>> {
        let mut orphans = Vec::new();
        self.cached.for_each(|key, _| {
            if !self.processed.exists(key)? {
                orphans.push(key.to_string());
            }
            Ok(true)
        })?;
        Ok(orphans)
    }

    /// Returns true when a reference that used to be valid has gone bad
    ///
    /// Requires a cached record with a valid state and a current record with
    /// an invalid one. A current record without a state never counts.
    pub fn is_vanished(current: &ReferenceRecord, cached: Option<&ReferenceRecord>) -> bool {
        match (current.state, cached) {
            (Some(state), Some(cached)) => cached.is_valid() && state.is_spoiled(),
            _ => false,
        }
    }
}
