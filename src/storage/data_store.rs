use crate::storage::traits::{RawStore, StorageResult, StoreValue};
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

/// Typed handle on a named store
///
/// Cloning a handle, or opening the same name again through the engine,
/// yields a handle on the same underlying data.
pub struct DataStore<T> {
    raw: Arc<dyn RawStore>,
    _marker: PhantomData<fn() -> T>,
}

impl<T> Clone for DataStore<T> {
    fn clone(&self) -> Self {
        Self {
            raw: Arc::clone(&self.raw),
            _marker: PhantomData,
        }
    }
}

impl<T> fmt::Debug for DataStore<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataStore")
            .field("name", &self.raw.name())
            .field("type", &std::any::type_name::<T>())
            .finish()
    }
}

impl<T: StoreValue> DataStore<T> {
    pub(crate) fn new(raw: Arc<dyn RawStore>) -> Self {
        Self {
            raw,
            _marker: PhantomData,
        }
    }

    /// Current store name
    pub fn name(&self) -> String {
        self.raw.name()
    }

    /// Inserts or replaces the value under `key`
    pub fn save(&self, key: &str, value: &T) -> StorageResult<()> {
        let json = serde_json::to_string(value)?;
        self.raw.save(key, &json)
    }

    /// Gets the value under `key`
    pub fn find(&self, key: &str) -> StorageResult<Option<T>> {
        match self.raw.find(key)? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// Gets the entry with the smallest key
    pub fn find_first(&self) -> StorageResult<Option<(String, T)>> {
        match self.raw.find_first()? {
            Some((key, json)) => Ok(Some((key, serde_json::from_str(&json)?))),
            None => Ok(None),
        }
    }

    pub fn exists(&self, key: &str) -> StorageResult<bool> {
        self.raw.exists(key)
    }

    pub fn count(&self) -> StorageResult<u64> {
        self.raw.count()
    }

    pub fn is_empty(&self) -> StorageResult<bool> {
        Ok(self.raw.count()? == 0)
    }

    /// Removes `key`, returning whether it was present
    pub fn delete(&self, key: &str) -> StorageResult<bool> {
        self.raw.delete(key)
    }

    pub fn clear(&self) -> StorageResult<()> {
        self.raw.clear()
    }

    /// Visits every entry in key order until the visitor returns false
    pub fn for_each<F>(&self, mut visitor: F) -> StorageResult<()>
    where
        F: FnMut(&str, T) -> StorageResult<bool>,
    {
        self.raw.for_each(&mut |key, json| {
            let value: T = serde_json::from_str(json)?;
            visitor(key, value)
        })
    }

    /// Collects every key in key order
    pub fn keys(&self) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        self.raw.for_each(&mut |key, _| {
            keys.push(key.to_string());
            Ok(true)
        })?;
        Ok(keys)
    }

    /// Untyped view of the same store
    pub fn raw(&self) -> &Arc<dyn RawStore> {
        &self.raw
    }
}
