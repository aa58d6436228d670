//! SQLite data-store engine
//!
//! This module provides the relational implementation of the
//! `DataStoreEngine` trait. One connection is shared by every store of the
//! engine and guarded by a mutex, which makes each store call atomic.

use crate::storage::schema::initialize_schema;
use crate::storage::traits::{DataStoreEngine, RawStore, RunContext, StorageError, StorageResult};
use chrono::Utc;
use parking_lot::{Mutex, RwLock};
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Connection string selecting a private in-memory database
pub const IN_MEMORY: &str = ":memory:";

type SharedConnection = Arc<Mutex<Connection>>;

/// SQLite-backed data-store engine
pub struct SqliteDataStoreEngine {
    /// Database file path or `:memory:`; defaults to a file in the crawler directory
    connection: Option<String>,
    state: Mutex<Option<SqliteEngineState>>,
}

struct SqliteEngineState {
    conn: SharedConnection,
    stores: HashMap<String, Arc<SqliteStore>>,
}

impl SqliteDataStoreEngine {
    /// Creates an engine for the given connection string
    ///
    /// When `connection` is `None` the database is created as
    /// `<work-dir>/<crawler-id>/datastore.db` during `init`.
    pub fn new(connection: Option<String>) -> Self {
        Self {
            connection,
            state: Mutex::new(None),
        }
    }

    /// Creates an engine over a private in-memory database (for testing)
    pub fn in_memory() -> Self {
        Self::new(Some(IN_MEMORY.to_string()))
    }

    fn open_connection(&self, run: &RunContext) -> StorageResult<Connection> {
        if self.connection.as_deref() == Some(IN_MEMORY) {
            return Ok(Connection::open_in_memory()?);
        }

        let path = match &self.connection {
            Some(path) => PathBuf::from(path),
            None => run.crawler_dir().join("datastore.db"),
        };
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)?;
        }

        let conn = Connection::open(&path)?;

        // Configure SQLite for concurrent readers and durable commits
        conn.execute_batch(
            "
            PRAGMA journal_mode = WAL;
            PRAGMA synchronous = NORMAL;
            PRAGMA temp_store = MEMORY;
        ",
        )?;
        Ok(conn)
    }

    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut SqliteEngineState) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(StorageError::NotInitialized)?;
        f(state)
    }
}

fn registered_type(conn: &Connection, name: &str) -> StorageResult<Option<String>> {
    let type_name = conn
        .query_row(
            "SELECT type_name FROM store_types WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )
        .optional()?;
    Ok(type_name)
}

impl DataStoreEngine for SqliteDataStoreEngine {
    fn kind(&self) -> &'static str {
        "sqlite"
    }

    fn init(&self, run: &RunContext) -> StorageResult<()> {
        let mut guard = self.state.lock();
        if guard.is_some() {
            return Err(StorageError::AlreadyInitialized);
        }

        let conn = self.open_connection(run)?;
        initialize_schema(&conn)?;

        tracing::info!(
            "SQLite data store ready for crawler '{}' ({})",
            run.crawler_id,
            self.connection.as_deref().unwrap_or("datastore.db")
        );

        *guard = Some(SqliteEngineState {
            conn: Arc::new(Mutex::new(conn)),
            stores: HashMap::new(),
        });
        Ok(())
    }

    fn clean(&self) -> StorageResult<bool> {
        self.with_state(|state| {
            let mut conn = state.conn.lock();
            for store in state.stores.values() {
                store.retire(&conn);
            }
            state.stores.clear();

            let tx = conn.transaction()?;
            let store_count = tx.execute("DELETE FROM store_types", [])?;
            let entry_count = tx.execute("DELETE FROM store_entries", [])?;
            tx.commit()?;

            tracing::info!("Cleaned {} stores ({} entries)", store_count, entry_count);
            Ok(store_count > 0 || entry_count > 0)
        })
    }

    fn close(&self) -> StorageResult<()> {
        let state = match self.state.lock().take() {
            Some(state) => state,
            None => return Ok(()),
        };

        {
            let conn = state.conn.lock();
            for store in state.stores.values() {
                store.retire(&conn);
            }
        }
        drop(state.stores);

        // Handles still held elsewhere keep the connection alive until dropped
        match Arc::try_unwrap(state.conn) {
            Ok(mutex) => mutex
                .into_inner()
                .close()
                .map_err(|(_, e)| StorageError::Sqlite(e)),
            Err(_) => {
                tracing::debug!("SQLite connection still shared, closing on last drop");
                Ok(())
            }
        }
    }

    fn open_raw_store(&self, name: &str, type_name: &str) -> StorageResult<Arc<dyn RawStore>> {
        self.with_state(|state| {
            let conn = state.conn.lock();
            match registered_type(&conn, name)? {
                Some(found) if found != type_name => {
                    return Err(StorageError::TypeMismatch {
                        name: name.to_string(),
                        expected: type_name.to_string(),
                        found,
                    });
                }
                Some(_) => {}
                None => {
                    conn.execute(
                        "INSERT INTO store_types (name, type_name, created_at) VALUES (?1, ?2, ?3)",
                        params![name, type_name, Utc::now().to_rfc3339()],
                    )?;
                    tracing::debug!("Created store '{}' ({})", name, type_name);
                }
            }
            drop(conn);

            let store = state
                .stores
                .entry(name.to_string())
                .or_insert_with(|| Arc::new(SqliteStore::new(name, Arc::clone(&state.conn))));
            Ok(Arc::clone(store) as Arc<dyn RawStore>)
        })
    }

    fn drop_store(&self, name: &str) -> StorageResult<bool> {
        self.with_state(|state| {
            let mut conn = state.conn.lock();
            if let Some(store) = state.stores.remove(name) {
                store.retire(&conn);
            }

            let tx = conn.transaction()?;
            let existed = tx.execute("DELETE FROM store_types WHERE name = ?1", params![name])?;
            tx.execute(
                "DELETE FROM store_entries WHERE store_name = ?1",
                params![name],
            )?;
            tx.commit()?;
            Ok(existed > 0)
        })
    }

    fn rename_raw_store(&self, name: &str, new_name: &str) -> StorageResult<bool> {
        if name == new_name {
            return Ok(false);
        }

        self.with_state(|state| {
            let mut conn = state.conn.lock();
            if registered_type(&conn, name)?.is_none() {
                return Err(StorageError::StoreNotFound(name.to_string()));
            }

            let tx = conn.transaction()?;
            let replaced =
                tx.execute("DELETE FROM store_types WHERE name = ?1", params![new_name])?;
            tx.execute(
                "DELETE FROM store_entries WHERE store_name = ?1",
                params![new_name],
            )?;
            tx.execute(
                "UPDATE store_types SET name = ?1 WHERE name = ?2",
                params![new_name, name],
            )?;
            tx.execute(
                "UPDATE store_entries SET store_name = ?1 WHERE store_name = ?2",
                params![new_name, name],
            )?;
            tx.commit()?;

            if let Some(target) = state.stores.remove(new_name) {
                target.retire(&conn);
            }
            if let Some(source) = state.stores.remove(name) {
                source.set_name(&conn, new_name);
                state.stores.insert(new_name.to_string(), source);
            }
            drop(conn);

            tracing::debug!("Renamed store '{}' to '{}'", name, new_name);
            Ok(replaced > 0)
        })
    }

    fn store_names(&self) -> StorageResult<Vec<String>> {
        self.with_state(|state| {
            let conn = state.conn.lock();
            let mut stmt = conn.prepare("SELECT name FROM store_types ORDER BY name")?;
            let names = stmt
                .query_map([], |row| row.get(0))?
                .collect::<Result<Vec<String>, _>>()?;
            Ok(names)
        })
    }

    fn store_type(&self, name: &str) -> StorageResult<Option<String>> {
        self.with_state(|state| registered_type(&state.conn.lock(), name))
    }
}

/// One named store inside the shared entries table
pub struct SqliteStore {
    name: RwLock<String>,
    live: AtomicBool,
    conn: SharedConnection,
}

impl SqliteStore {
    fn new(name: &str, conn: SharedConnection) -> Self {
        Self {
            name: RwLock::new(name.to_string()),
            live: AtomicBool::new(true),
            conn,
        }
    }

    /// Renames the handle; the caller holds the connection lock
    fn set_name(&self, _conn: &Connection, name: &str) {
        *self.name.write() = name.to_string();
    }

    /// Makes the handle unusable; the caller holds the connection lock
    fn retire(&self, _conn: &Connection) {
        self.live.store(false, Ordering::SeqCst);
    }

    /// Locks the connection and returns it with the current store name
    ///
    /// Name and liveness only change under the connection lock, so they are
    /// read after taking it.
    fn checked(&self) -> StorageResult<(parking_lot::MutexGuard<'_, Connection>, String)> {
        let conn = self.conn.lock();
        let name = self.name.read().clone();
        if !self.live.load(Ordering::SeqCst) {
            return Err(StorageError::StoreUnavailable(name));
        }
        Ok((conn, name))
    }
}

impl RawStore for SqliteStore {
    fn name(&self) -> String {
        self.name.read().clone()
    }

    fn save(&self, key: &str, value: &str) -> StorageResult<()> {
        let (conn, name) = self.checked()?;
        conn.execute(
            "INSERT OR REPLACE INTO store_entries (store_name, key, value) VALUES (?1, ?2, ?3)",
            params![name, key, value],
        )?;
        Ok(())
    }

    fn find(&self, key: &str) -> StorageResult<Option<String>> {
        let (conn, name) = self.checked()?;
        let value = conn
            .query_row(
                "SELECT value FROM store_entries WHERE store_name = ?1 AND key = ?2",
                params![name, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }

    fn find_first(&self) -> StorageResult<Option<(String, String)>> {
        let (conn, name) = self.checked()?;
        let entry = conn
            .query_row(
                "SELECT key, value FROM store_entries WHERE store_name = ?1 \
                 ORDER BY key ASC LIMIT 1",
                params![name],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )
            .optional()?;
        Ok(entry)
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        let (conn, name) = self.checked()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM store_entries WHERE store_name = ?1 AND key = ?2",
                params![name, key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn count(&self) -> StorageResult<u64> {
        let (conn, name) = self.checked()?;
        let count: i64 = conn.query_row(
            "SELECT COUNT(*) FROM store_entries WHERE store_name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count as u64)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let (conn, name) = self.checked()?;
        let deleted = conn.execute(
            "DELETE FROM store_entries WHERE store_name = ?1 AND key = ?2",
            params![name, key],
        )?;
        Ok(deleted > 0)
    }

    fn clear(&self) -> StorageResult<()> {
        let (conn, name) = self.checked()?;
        conn.execute(
            "DELETE FROM store_entries WHERE store_name = ?1",
            params![name],
        )?;
        Ok(())
    }

    fn for_each(
        &self,
        visitor: &mut dyn FnMut(&str, &str) -> StorageResult<bool>,
    ) -> StorageResult<()> {
        // Snapshot first so the visitor can use the connection
        let entries = {
            let (conn, name) = self.checked()?;
            let mut stmt = conn.prepare(
                "SELECT key, value FROM store_entries WHERE store_name = ?1 ORDER BY key ASC",
            )?;
            let rows = stmt
                .query_map(params![name], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
                })?
                .collect::<Result<Vec<_>, _>>()?;
            rows
        };

        for (key, value) in &entries {
            if !visitor(key, value)? {
                break;
            }
        }
        Ok(())
    }
}
