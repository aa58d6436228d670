//! Storage module for persisting crawl state
//!
//! This module defines the data-store engine contract and its backends:
//! - `LogDataStoreEngine`: embedded, file-backed, log-structured stores
//! - `SqliteDataStoreEngine`: relational stores in a SQLite database
//!
//! Both satisfy the same `DataStoreEngine` semantics, so the rest of the
//! crate only ever sees `Arc<dyn DataStoreEngine>` and typed `DataStore<T>`
//! handles.

mod data_store;
mod log_store;
mod schema;
mod sqlite;
mod traits;

pub use data_store::DataStore;
pub use log_store::{LogDataStoreEngine, DEFAULT_COMPACTION_THRESHOLD};
pub use sqlite::{SqliteDataStoreEngine, IN_MEMORY};
pub use traits::{
    DataStoreEngine, DataStoreEngineExt, RawStore, RunContext, StorageError, StorageResult,
    StoreValue,
};

use crate::config::DataStoreConfig;
use std::path::PathBuf;
use std::sync::Arc;

/// Creates the data-store engine selected by the configuration
///
/// The engine still has to be bound to a run with `init`.
pub fn open_engine(config: &DataStoreConfig) -> Arc<dyn DataStoreEngine> {
    match config {
        DataStoreConfig::Log {
            path,
            compaction_threshold,
        } => Arc::new(LogDataStoreEngine::with_compaction_threshold(
            path.as_ref().map(PathBuf::from),
            *compaction_threshold,
        )),
        DataStoreConfig::Sqlite { connection } => {
            Arc::new(SqliteDataStoreEngine::new(connection.clone()))
        }
    }
}

/// Copies every store of `source` into `target`
///
/// Stores keep their names and declared types; existing target stores of
/// the same name are overwritten. Both engines must be initialized.
///
/// # Returns
///
/// The number of entries copied
pub fn migrate_stores(
    source: &dyn DataStoreEngine,
    target: &dyn DataStoreEngine,
) -> StorageResult<u64> {
    let mut copied = 0;

    for name in source.store_names()? {
        let type_name = source
            .store_type(&name)?
            .ok_or_else(|| StorageError::StoreNotFound(name.clone()))?;

        let from = source.open_raw_store(&name, &type_name)?;
        let to = target.open_raw_store(&name, &type_name)?;
        to.clear()?;

        let mut count = 0;
        from.for_each(&mut |key, value| {
            to.save(key, value)?;
            count += 1;
            Ok(true)
        })?;

        tracing::info!(
            "Migrated store '{}' ({} entries) from {} to {}",
            name,
            count,
            source.kind(),
            target.kind()
        );
        copied += count;
    }

    Ok(copied)
}
