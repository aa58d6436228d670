//! Embedded log-structured data-store engine
//!
//! Every store is an append-only log file replayed into an in-memory index
//! when the store is opened. Each record is protected by a CRC32 so a line
//! torn by a crash is detected and discarded on reload.
//!
//! # File Layout
//!
//! ```text
//! <engine dir>/
//!   stores.json          name -> declared value type
//!   <hex(name)>.log      one record per line: "<crc32 hex> <json>"
//! ```
//!
//! A record is either `{"op":"put","key":..,"value":..}` or
//! `{"op":"del","key":..}`. Logs are compacted when stale records pile up.

use crate::storage::traits::{DataStoreEngine, RawStore, RunContext, StorageError, StorageResult};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

const MANIFEST_FILE: &str = "stores.json";
const LOG_EXTENSION: &str = "log";

/// Default number of stale records tolerated before compaction
pub const DEFAULT_COMPACTION_THRESHOLD: usize = 1000;

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
enum LogRecord {
    Put { key: String, value: String },
    Del { key: String },
}

fn encode_record(record: &LogRecord) -> StorageResult<String> {
    let json = serde_json::to_string(record)?;
    let crc = crc32fast::hash(json.as_bytes());
    Ok(format!("{:08x} {}\n", crc, json))
}

fn decode_record(line: &str) -> Option<LogRecord> {
    let (crc_hex, json) = line.split_once(' ')?;
    let expected = u32::from_str_radix(crc_hex, 16).ok()?;
    if crc32fast::hash(json.as_bytes()) != expected {
        return None;
    }
    serde_json::from_str(json).ok()
}

/// Moves a log over `to`, leaving no log at `to` when `from` is missing
fn move_log(from: &Path, to: &Path) -> StorageResult<()> {
    if from.exists() {
        std::fs::rename(from, to)?;
    } else if to.exists() {
        std::fs::remove_file(to)?;
    }
    Ok(())
}

fn log_path(dir: &Path, name: &str) -> PathBuf {
    dir.join(format!("{}.{}", hex::encode(name.as_bytes()), LOG_EXTENSION))
}

/// File-backed, log-structured data-store engine
pub struct LogDataStoreEngine {
    /// Explicit directory; defaults to `<work-dir>/<crawler-id>/datastore`
    dir: Option<PathBuf>,
    compaction_threshold: usize,
    state: Mutex<Option<LogEngineState>>,
}

struct LogEngineState {
    dir: PathBuf,
    manifest: BTreeMap<String, String>,
    stores: HashMap<String, Arc<LogStore>>,
}

impl LogEngineState {
    fn save_manifest(&self) -> StorageResult<()> {
        let staged = self.stage_manifest()?;
        self.commit_manifest(&staged)
    }

    /// Writes the manifest next to the live one without replacing it
    fn stage_manifest(&self) -> StorageResult<PathBuf> {
        let tmp = self.dir.join(format!("{}.tmp", MANIFEST_FILE));
        let json = serde_json::to_string_pretty(&self.manifest)?;
        std::fs::write(&tmp, json)?;
        Ok(tmp)
    }

    fn commit_manifest(&self, staged: &Path) -> StorageResult<()> {
        std::fs::rename(staged, self.dir.join(MANIFEST_FILE))?;
        Ok(())
    }

    /// Destroys the store `name` whether or not it is open
    fn destroy(&mut self, name: &str) -> StorageResult<()> {
        match self.stores.remove(name) {
            Some(store) => store.destroy(),
            None => {
                let path = log_path(&self.dir, name);
                if path.exists() {
                    std::fs::remove_file(path)?;
                }
                Ok(())
            }
        }
    }
}

impl LogDataStoreEngine {
    pub fn new(dir: Option<PathBuf>) -> Self {
        Self::with_compaction_threshold(dir, DEFAULT_COMPACTION_THRESHOLD)
    }

    pub fn with_compaction_threshold(dir: Option<PathBuf>, compaction_threshold: usize) -> Self {
        Self {
            dir,
            compaction_threshold: compaction_threshold.max(1),
            state: Mutex::new(None),
        }
    }

    fn with_state<R>(
        &self,
        f: impl FnOnce(&mut LogEngineState) -> StorageResult<R>,
    ) -> StorageResult<R> {
        let mut guard = self.state.lock();
        let state = guard.as_mut().ok_or(StorageError::NotInitialized)?;
        f(state)
    }
}

impl DataStoreEngine for LogDataStoreEngine {
    fn kind(&self) -> &'static str {
        "log"
    }

    fn init(&self, run: &RunContext) -> StorageResult<()> {
        let mut guard = self.state.lock();
        if guard.is_some() {
            return Err(StorageError::AlreadyInitialized);
        }

        let dir = self
            .dir
            .clone()
            .unwrap_or_else(|| run.crawler_dir().join("datastore"));
        std::fs::create_dir_all(&dir)?;

        let manifest_path = dir.join(MANIFEST_FILE);
        let manifest: BTreeMap<String, String> = if manifest_path.exists() {
            let content = std::fs::read_to_string(&manifest_path)?;
            serde_json::from_str(&content).map_err(|e| {
                StorageError::Corrupt(format!("{}: {}", manifest_path.display(), e))
            })?
        } else {
            BTreeMap::new()
        };

        tracing::info!(
            "Log data store ready for crawler '{}' at {} ({} stores)",
            run.crawler_id,
            dir.display(),
            manifest.len()
        );

        *guard = Some(LogEngineState {
            dir,
            manifest,
            stores: HashMap::new(),
        });
        Ok(())
    }

    fn clean(&self) -> StorageResult<bool> {
        self.with_state(|state| {
            let names: Vec<String> = state.manifest.keys().cloned().collect();
            for name in &names {
                state.destroy(name)?;
            }
            state.manifest.clear();
            state.save_manifest()?;

            tracing::info!("Cleaned {} stores", names.len());
            Ok(!names.is_empty())
        })
    }

    fn close(&self) -> StorageResult<()> {
        let state = match self.state.lock().take() {
            Some(state) => state,
            None => return Ok(()),
        };

        let mut first_error = None;
        for store in state.stores.values() {
            if let Err(e) = store.close() {
                tracing::warn!("Failed to close store '{}': {}", store.name(), e);
                if first_error.is_none() {
                    first_error = Some(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }

    fn open_raw_store(&self, name: &str, type_name: &str) -> StorageResult<Arc<dyn RawStore>> {
        let threshold = self.compaction_threshold;
        self.with_state(|state| {
            if let Some(found) = state.manifest.get(name) {
                if found != type_name {
                    return Err(StorageError::TypeMismatch {
                        name: name.to_string(),
                        expected: type_name.to_string(),
                        found: found.clone(),
                    });
                }
            }

            if let Some(store) = state.stores.get(name) {
                return Ok(Arc::clone(store) as Arc<dyn RawStore>);
            }

            let store = Arc::new(LogStore::open(name, log_path(&state.dir, name), threshold)?);
            if !state.manifest.contains_key(name) {
                state.manifest.insert(name.to_string(), type_name.to_string());
                state.save_manifest()?;
                tracing::debug!("Created store '{}' ({})", name, type_name);
            }
            state.stores.insert(name.to_string(), Arc::clone(&store));
            Ok(store as Arc<dyn RawStore>)
        })
    }

    fn drop_store(&self, name: &str) -> StorageResult<bool> {
        self.with_state(|state| {
            if state.manifest.remove(name).is_none() {
                return Ok(false);
            }
            state.destroy(name)?;
            state.save_manifest()?;
            Ok(true)
        })
    }

    fn rename_raw_store(&self, name: &str, new_name: &str) -> StorageResult<bool> {
        if name == new_name {
            return Ok(false);
        }

        self.with_state(|state| {
            let type_name = state
                .manifest
                .get(name)
                .cloned()
                .ok_or_else(|| StorageError::StoreNotFound(name.to_string()))?;

            let replaced = state.manifest.remove(new_name).is_some();
            state.manifest.remove(name);
            state.manifest.insert(new_name.to_string(), type_name);
            let staged = state.stage_manifest()?;

            // The source log atomically replaces the target log; the manifest
            // follows once the data is in place.
            if let Some(target) = state.stores.remove(new_name) {
                target.retire();
            }
            let new_path = log_path(&state.dir, new_name);
            match state.stores.remove(name) {
                Some(store) => {
                    store.relocate(new_name, new_path)?;
                    state.stores.insert(new_name.to_string(), store);
                }
                None => move_log(&log_path(&state.dir, name), &new_path)?,
            }
            state.commit_manifest(&staged)?;

            tracing::debug!("Renamed store '{}' to '{}'", name, new_name);
            Ok(replaced)
        })
    }

    fn store_names(&self) -> StorageResult<Vec<String>> {
        self.with_state(|state| Ok(state.manifest.keys().cloned().collect()))
    }

    fn store_type(&self, name: &str) -> StorageResult<Option<String>> {
        self.with_state(|state| Ok(state.manifest.get(name).cloned()))
    }
}

/// One append-only log plus its in-memory index
pub struct LogStore {
    name: RwLock<String>,
    live: AtomicBool,
    compaction_threshold: usize,
    inner: Mutex<LogStoreInner>,
}

struct LogStoreInner {
    path: PathBuf,
    index: BTreeMap<String, String>,
    file: Option<File>,
    /// Records in the log that no longer contribute to the index
    stale: usize,
}

fn open_append(path: &Path) -> StorageResult<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

impl LogStoreInner {
    fn append(&mut self, record: &LogRecord) -> StorageResult<()> {
        let line = encode_record(record)?;
        if self.file.is_none() {
            self.file = Some(open_append(&self.path)?);
        }
        if let Some(file) = self.file.as_mut() {
            file.write_all(line.as_bytes())?;
        }
        Ok(())
    }

    /// Rewrites the log with one record per live key
    fn compact(&mut self) -> StorageResult<()> {
        let tmp = self.path.with_extension("compact");
        {
            let mut out = File::create(&tmp)?;
            for (key, value) in &self.index {
                let line = encode_record(&LogRecord::Put {
                    key: key.clone(),
                    value: value.clone(),
                })?;
                out.write_all(line.as_bytes())?;
            }
            out.sync_all()?;
        }

        self.file = None;
        std::fs::rename(&tmp, &self.path)?;
        self.file = Some(open_append(&self.path)?);

        tracing::debug!(
            "Compacted {} ({} live, {} stale dropped)",
            self.path.display(),
            self.index.len(),
            self.stale
        );
        self.stale = 0;
        Ok(())
    }
}

impl LogStore {
    /// Opens the log at `path`, replaying it into memory
    fn open(name: &str, path: PathBuf, compaction_threshold: usize) -> StorageResult<Self> {
        let mut index = BTreeMap::new();
        let mut stale = 0;
        let mut torn = 0;

        if path.exists() {
            let reader = BufReader::new(File::open(&path)?);
            for line in reader.lines() {
                let line = line?;
                match decode_record(&line) {
                    Some(LogRecord::Put { key, value }) => {
                        if index.insert(key, value).is_some() {
                            stale += 1;
                        }
                    }
                    Some(LogRecord::Del { key }) => {
                        if index.remove(&key).is_some() {
                            stale += 1;
                        }
                        stale += 1;
                    }
                    None => torn += 1,
                }
            }
        }

        let mut inner = LogStoreInner {
            path,
            index,
            file: None,
            stale,
        };

        if torn > 0 {
            tracing::warn!(
                "Discarded {} unreadable record(s) in store '{}', rewriting log",
                torn,
                name
            );
            inner.compact()?;
        }

        Ok(Self {
            name: RwLock::new(name.to_string()),
            live: AtomicBool::new(true),
            compaction_threshold,
            inner: Mutex::new(inner),
        })
    }

    /// Locks the store, failing once it was destroyed or closed
    ///
    /// `live` is only flipped while `inner` is held, so checking it under the
    /// lock keeps writes from landing after `destroy` removed the log.
    fn lock(&self) -> StorageResult<parking_lot::MutexGuard<'_, LogStoreInner>> {
        let inner = self.inner.lock();
        if !self.live.load(Ordering::SeqCst) {
            return Err(StorageError::StoreUnavailable(self.name()));
        }
        Ok(inner)
    }

    fn maybe_compact(&self, inner: &mut LogStoreInner) -> StorageResult<()> {
        if inner.stale > self.compaction_threshold && inner.stale > inner.index.len() {
            inner.compact()?;
        }
        Ok(())
    }

    /// Deletes the log file and makes the store unusable
    fn destroy(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        self.live.store(false, Ordering::SeqCst);
        inner.file = None;
        inner.index.clear();
        if inner.path.exists() {
            std::fs::remove_file(&inner.path)?;
        }
        Ok(())
    }

    /// Makes the store unusable without touching its log file
    fn retire(&self) {
        let mut inner = self.inner.lock();
        self.live.store(false, Ordering::SeqCst);
        inner.file = None;
        inner.index.clear();
    }

    /// Moves the log file under a new store name
    fn relocate(&self, new_name: &str, new_path: PathBuf) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        inner.file = None;
        move_log(&inner.path, &new_path)?;
        inner.path = new_path;
        *self.name.write() = new_name.to_string();
        Ok(())
    }

    /// Flushes the log to disk and releases the file handle
    fn close(&self) -> StorageResult<()> {
        let mut inner = self.inner.lock();
        self.live.store(false, Ordering::SeqCst);
        match inner.file.take() {
            Some(file) => Ok(file.sync_all()?),
            None => Ok(()),
        }
    }
}

impl RawStore for LogStore {
    fn name(&self) -> String {
        self.name.read().clone()
    }

    fn save(&self, key: &str, value: &str) -> StorageResult<()> {
        let mut inner = self.lock()?;
        inner.append(&LogRecord::Put {
            key: key.to_string(),
            value: value.to_string(),
        })?;
        if inner.index.insert(key.to_string(), value.to_string()).is_some() {
            inner.stale += 1;
        }
        self.maybe_compact(&mut inner)
    }

    fn find(&self, key: &str) -> StorageResult<Option<String>> {
        Ok(self.lock()?.index.get(key).cloned())
    }

    fn find_first(&self) -> StorageResult<Option<(String, String)>> {
        Ok(self
            .lock()?
            .index
            .iter()
            .next()
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    fn exists(&self, key: &str) -> StorageResult<bool> {
        Ok(self.lock()?.index.contains_key(key))
    }

    fn count(&self) -> StorageResult<u64> {
        Ok(self.lock()?.index.len() as u64)
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let mut inner = self.lock()?;
        if !inner.index.contains_key(key) {
            return Ok(false);
        }
        inner.append(&LogRecord::Del {
            key: key.to_string(),
        })?;
        inner.index.remove(key);
        inner.stale += 2;
        self.maybe_compact(&mut inner)?;
        Ok(true)
    }

    fn clear(&self) -> StorageResult<()> {
        let mut inner = self.lock()?;
        inner.file = None;
        File::create(&inner.path)?;
        inner.index.clear();
        inner.stale = 0;
        Ok(())
    }

    fn for_each(
        &self,
        visitor: &mut dyn FnMut(&str, &str) -> StorageResult<bool>,
    ) -> StorageResult<()> {
        let snapshot: Vec<(String, String)> = self
            .lock()?
            .index
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        for (key, value) in &snapshot {
            if !visitor(key, value)? {
                break;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::DataStoreEngineExt;
    use tempfile::TempDir;

    fn engine_in(dir: &TempDir, threshold: usize) -> LogDataStoreEngine {
        let engine = LogDataStoreEngine::with_compaction_threshold(None, threshold);
        engine.init(&RunContext::new("crawler", dir.path())).unwrap();
        engine
    }

    #[test]
    fn test_record_codec_detects_corruption() {
        let line = encode_record(&LogRecord::Put {
            key: "a".to_string(),
            value: "1".to_string(),
        })
        .unwrap();
        assert!(decode_record(line.trim_end()).is_some());

        let tampered = line.trim_end().replace("\"1\"", "\"2\"");
        assert!(decode_record(&tampered).is_none());
        assert!(decode_record("not a record").is_none());
    }

    #[test]
    fn test_log_file_naming_is_hex() {
        let path = log_path(Path::new("/tmp"), "queued");
        assert_eq!(path, PathBuf::from("/tmp/717565756564.log"));
    }

    #[test]
    fn test_replay_restores_index() {
        let dir = TempDir::new().unwrap();
        {
            let engine = engine_in(&dir, 1000);
            let store = engine.open_store::<u32>("numbers").unwrap();
            store.save("a", &1).unwrap();
            store.save("b", &2).unwrap();
            store.save("a", &3).unwrap();
            assert!(store.delete("b").unwrap());
            engine.close().unwrap();
        }

        let engine = engine_in(&dir, 1000);
        let store = engine.open_store::<u32>("numbers").unwrap();
        assert_eq!(store.find("a").unwrap(), Some(3));
        assert_eq!(store.find("b").unwrap(), None);
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_torn_tail_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path;
        {
            let engine = engine_in(&dir, 1000);
            let store = engine.open_store::<String>("pages").unwrap();
            store.save("kept", &"yes".to_string()).unwrap();
            path = log_path(&dir.path().join("crawler").join("datastore"), "pages");
            engine.close().unwrap();
        }

        let mut file = OpenOptions::new().append(true).open(&path).unwrap();
        file.write_all(b"deadbeef {\"op\":\"put\",\"key\":\"lost\"").unwrap();
        drop(file);

        let engine = engine_in(&dir, 1000);
        let store = engine.open_store::<String>("pages").unwrap();
        assert_eq!(store.find("kept").unwrap(), Some("yes".to_string()));
        assert!(!store.exists("lost").unwrap());

        store.save("after", &"ok".to_string()).unwrap();
        engine.close().unwrap();

        let engine = engine_in(&dir, 1000);
        let store = engine.open_store::<String>("pages").unwrap();
        assert_eq!(store.count().unwrap(), 2);
    }

    #[test]
    fn test_compaction_keeps_live_entries() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir, 5);
        let store = engine.open_store::<u32>("churn").unwrap();

        for i in 0..50 {
            store.save("hot", &i).unwrap();
        }
        store.save("cold", &7).unwrap();

        let path = log_path(&dir.path().join("crawler").join("datastore"), "churn");
        let lines = std::fs::read_to_string(&path).unwrap().lines().count();
        assert!(lines < 20, "log should have been compacted, has {} lines", lines);

        engine.close().unwrap();
        let engine = engine_in(&dir, 5);
        let store = engine.open_store::<u32>("churn").unwrap();
        assert_eq!(store.find("hot").unwrap(), Some(49));
        assert_eq!(store.find("cold").unwrap(), Some(7));
    }

    #[test]
    fn test_type_recorded_across_restart() {
        let dir = TempDir::new().unwrap();
        {
            let engine = engine_in(&dir, 1000);
            engine.open_store::<u32>("typed").unwrap();
            engine.close().unwrap();
        }

        let engine = engine_in(&dir, 1000);
        let result = engine.open_store::<String>("typed");
        assert!(matches!(result, Err(StorageError::TypeMismatch { .. })));
    }

    #[test]
    fn test_rename_moves_log_file() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir, 1000);
        let store = engine.open_store::<u32>("processed").unwrap();
        store.save("a", &1).unwrap();
        engine.close().unwrap();

        let engine = engine_in(&dir, 1000);
        // Rename a store that was never opened in this engine instance
        assert!(!engine.rename_raw_store("processed", "cached").unwrap());
        let cached = engine.open_store::<u32>("cached").unwrap();
        assert_eq!(cached.find("a").unwrap(), Some(1));
        assert_eq!(engine.store_names().unwrap(), vec!["cached".to_string()]);
    }

    #[test]
    fn test_rename_over_target_survives_restart() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir, 1000);
        let processed = engine.open_store::<u32>("processed").unwrap();
        let cached = engine.open_store::<u32>("cached").unwrap();
        processed.save("new", &2).unwrap();
        cached.save("old", &1).unwrap();

        assert!(engine.rename_store(&processed, "cached").unwrap());
        engine.close().unwrap();

        let store_dir = dir.path().join("crawler").join("datastore");
        assert!(!store_dir.join(format!("{}.tmp", MANIFEST_FILE)).exists());
        assert!(!log_path(&store_dir, "processed").exists());

        let engine = engine_in(&dir, 1000);
        assert_eq!(engine.store_names().unwrap(), vec!["cached".to_string()]);
        let cached = engine.open_store::<u32>("cached").unwrap();
        assert_eq!(cached.keys().unwrap(), vec!["new".to_string()]);
    }

    #[test]
    fn test_crash_between_log_move_and_manifest() {
        let dir = TempDir::new().unwrap();
        let engine = engine_in(&dir, 1000);
        engine.open_store::<u32>("processed").unwrap().save("new", &2).unwrap();
        engine.open_store::<u32>("cached").unwrap().save("old", &1).unwrap();
        engine.close().unwrap();

        // Log already moved over the target, manifest still the old one
        let store_dir = dir.path().join("crawler").join("datastore");
        std::fs::rename(
            log_path(&store_dir, "processed"),
            log_path(&store_dir, "cached"),
        )
        .unwrap();

        let engine = engine_in(&dir, 1000);
        let cached = engine.open_store::<u32>("cached").unwrap();
        assert_eq!(cached.keys().unwrap(), vec!["new".to_string()]);
        assert!(engine.open_store::<u32>("processed").unwrap().is_empty().unwrap());
    }
}
