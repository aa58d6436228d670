//! Database schema definitions
//!
//! This module contains the SQL schema used by the SQLite data-store engine.
//! All stores share one entries table, partitioned by store name.

use crate::storage::{StorageError, StorageResult};

/// SQL schema for the database
pub const SCHEMA_SQL: &str = r#"
-- Declared value type of every store
CREATE TABLE IF NOT EXISTS store_types (
    name TEXT PRIMARY KEY,
    type_name TEXT NOT NULL,
    created_at TEXT NOT NULL
);

-- Entries of all stores
CREATE TABLE IF NOT EXISTS store_entries (
    store_name TEXT NOT NULL,
    key TEXT NOT NULL,
    value TEXT NOT NULL,
    PRIMARY KEY (store_name, key)
);

CREATE INDEX IF NOT EXISTS idx_store_entries_store ON store_entries(store_name);
"#;

/// Schema version stored in `PRAGMA user_version`
pub const SCHEMA_VERSION: u32 = 1;

/// Creates the catalog and entries tables if missing
///
/// Fails with `StorageError::Corrupt` when the database was written by a
/// newer schema.
pub fn initialize_schema(conn: &rusqlite::Connection) -> StorageResult<()> {
    let version: u32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;
    if version > SCHEMA_VERSION {
        return Err(StorageError::Corrupt(format!(
            "schema version {} is newer than supported version {}",
            version, SCHEMA_VERSION
        )));
    }

    conn.execute_batch(SCHEMA_SQL)?;
    conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;
    Ok(())
}
