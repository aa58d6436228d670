//! Storage traits and error types
//!
//! This module defines the contract every data-store backend must satisfy
//! and the error type shared by all of them.

use crate::storage::DataStore;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::PathBuf;
use std::sync::Arc;
use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Engine is not initialized")]
    NotInitialized,

    #[error("Engine is already initialized")]
    AlreadyInitialized,

    #[error("Store '{name}' holds {found} but was opened as {expected}")]
    TypeMismatch {
        name: String,
        expected: String,
        found: String,
    },

    #[error("Store not found: {0}")]
    StoreNotFound(String),

    #[error("Store '{0}' was dropped, renamed over or closed")]
    StoreUnavailable(String),

    #[error("Corrupt store data: {0}")]
    Corrupt(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
}

/// Result type for storage operations
pub type StorageResult<T> = Result<T, StorageError>;

/// Values that can be kept in a data store
pub trait StoreValue: Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> StoreValue for T where T: Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Identifies the crawl run an engine is bound to
#[derive(Debug, Clone)]
pub struct RunContext {
    /// Crawler identifier, unique per work directory
    pub crawler_id: String,

    /// Root directory for the crawler's working files
    pub work_dir: PathBuf,
}

impl RunContext {
    pub fn new(crawler_id: impl Into<String>, work_dir: impl Into<PathBuf>) -> Self {
        Self {
            crawler_id: crawler_id.into(),
            work_dir: work_dir.into(),
        }
    }

    /// Directory holding this crawler's data
    pub fn crawler_dir(&self) -> PathBuf {
        self.work_dir.join(&self.crawler_id)
    }
}

/// Untyped view of a named store
///
/// Values are JSON documents. Every method is atomic with respect to the
/// other methods called on the same store.
pub trait RawStore: Send + Sync {
    /// Current name of the store (follows renames)
    fn name(&self) -> String;

    /// Inserts or replaces the value under `key`
    fn save(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Gets the value under `key`
    fn find(&self, key: &str) -> StorageResult<Option<String>>;

    /// Gets the entry with the smallest key
    fn find_first(&self) -> StorageResult<Option<(String, String)>>;

    /// Checks whether `key` is present
    fn exists(&self, key: &str) -> StorageResult<bool>;

    /// Counts the entries
    fn count(&self) -> StorageResult<u64>;

    /// Removes `key`, returning whether it was present
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Removes every entry
    fn clear(&self) -> StorageResult<()>;

    /// Visits a snapshot of all entries in key order
    ///
    /// The visitor returns `false` to stop early. It may call back into any
    /// store of the same engine.
    fn for_each(&self, visitor: &mut dyn FnMut(&str, &str) -> StorageResult<bool>)
        -> StorageResult<()>;
}

/// Trait for data-store engine implementations
///
/// An engine owns the named stores of one crawler. `init`, `clean` and
/// `close` are run-lifecycle calls made by a single coordinating thread;
/// the store-level calls may come from any worker.
pub trait DataStoreEngine: Send + Sync {
    /// Short backend name used in logs and diagnostics
    fn kind(&self) -> &'static str;

    /// Binds the engine to the storage of a crawl run
    ///
    /// Initializing against storage left by an earlier run reopens its stores.
    fn init(&self, run: &RunContext) -> StorageResult<()>;

    /// Destroys every store
    ///
    /// Returns false if there was nothing to clean.
    fn clean(&self) -> StorageResult<bool>;

    /// Releases connections and file handles
    ///
    /// Safe to call more than once. In-process resources are released even
    /// when flushing fails.
    fn close(&self) -> StorageResult<()>;

    /// Opens (or creates) the store `name` holding values of `type_name`
    ///
    /// Repeated opens with the same type share one store object.
    fn open_raw_store(&self, name: &str, type_name: &str) -> StorageResult<Arc<dyn RawStore>>;

    /// Deletes the store `name` and all its data
    ///
    /// Returns false if no such store exists.
    fn drop_store(&self, name: &str) -> StorageResult<bool>;

    /// Moves every entry of `name` to `new_name`
    ///
    /// An existing store at `new_name` is destroyed first, in which case
    /// true is returned. Open handles on `name` follow the rename.
    fn rename_raw_store(&self, name: &str, new_name: &str) -> StorageResult<bool>;

    /// Lists the names of all stores
    fn store_names(&self) -> StorageResult<Vec<String>>;

    /// Gets the declared value type of a store
    fn store_type(&self, name: &str) -> StorageResult<Option<String>>;
}

/// Typed operations available on every engine
pub trait DataStoreEngineExt: DataStoreEngine {
    /// Opens (or creates) a typed store
    ///
    /// Fails with `StorageError::TypeMismatch` if the store was created with
    /// another value type.
    fn open_store<T: StoreValue>(&self, name: &str) -> StorageResult<DataStore<T>> {
        let raw = self.open_raw_store(name, std::any::type_name::<T>())?;
        Ok(DataStore::new(raw))
    }

    /// Renames the store behind `store` to `new_name`
    fn rename_store<T: StoreValue>(
        &self,
        store: &DataStore<T>,
        new_name: &str,
    ) -> StorageResult<bool> {
        self.rename_raw_store(&store.name(), new_name)
    }
}

impl<E: DataStoreEngine + ?Sized> DataStoreEngineExt for E {}
