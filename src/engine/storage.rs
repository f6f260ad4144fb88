//! Key/value storage contract.
//!
//! The game state never talks to a concrete database. It persists through the
//! narrow [`KvStore`] contract:
//!
//! - point operations: `has`, `get`, `set`, `delete`,
//! - [`KvBatch`]: a write batch with read-your-writes semantics that becomes
//!   visible to other readers only on `commit`, and leaves no trace on `discard`.
//!
//! A tick's changes are written through a single batch, so readers observe
//! either the state before the tick or the state after it.
//!
//! [`MemoryStore`] is the in-process implementation used by tests, benches and
//! single-node worlds.

use std::collections::BTreeMap;
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::engine::error::StoreResult;

/// Pluggable key/value backend.
pub trait KvStore: Send + Sync {
    /// Returns `true` if `key` holds a value.
    fn has(&self, key: &str) -> StoreResult<bool>;

    /// Returns the value at `key`, or `None` if absent.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Stores `value` at `key`.
    fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Removes `key`. Removing an absent key is not an error.
    fn delete(&self, key: &str) -> StoreResult<()>;

    /// Opens an isolated write batch.
    fn batch(&self) -> Box<dyn KvBatch + '_>;
}

/// Isolated write batch over a [`KvStore`].
///
/// Reads through the batch see its own pending writes layered over the
/// committed data. Nothing is visible to other readers before `commit`.
pub trait KvBatch {
    /// Returns `true` if `key` holds a value in the batch view.
    fn has(&self, key: &str) -> StoreResult<bool>;

    /// Returns the value at `key` in the batch view.
    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>>;

    /// Stages a write.
    fn set(&mut self, key: &str, value: Vec<u8>) -> StoreResult<()>;

    /// Stages a removal.
    fn delete(&mut self, key: &str) -> StoreResult<()>;

    /// Applies every staged operation atomically.
    fn commit(self: Box<Self>) -> StoreResult<()>;

    /// Drops every staged operation.
    fn discard(self: Box<Self>);
}

/// In-memory [`KvStore`] backed by an ordered map.
#[derive(Default)]
pub struct MemoryStore {
    data: RwLock<BTreeMap<String, Vec<u8>>>,
}

impl MemoryStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, BTreeMap<String, Vec<u8>>> {
        self.data.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Number of stored keys.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    /// Returns `true` if the store holds no keys.
    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    /// Keys starting with `prefix`, in order.
    pub fn keys_with_prefix(&self, prefix: &str) -> Vec<String> {
        self.read()
            .range(prefix.to_string()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, _)| key.clone())
            .collect()
    }
}

impl KvStore for MemoryStore {
    fn has(&self, key: &str) -> StoreResult<bool> {
        Ok(self.read().contains_key(key))
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        Ok(self.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.write().insert(key.to_string(), value);
        Ok(())
    }

    fn delete(&self, key: &str) -> StoreResult<()> {
        self.write().remove(key);
        Ok(())
    }

    fn batch(&self) -> Box<dyn KvBatch + '_> {
        Box::new(MemoryBatch { store: self, pending: BTreeMap::new() })
    }
}

/// Write batch over a [`MemoryStore`]. `None` marks a staged deletion.
struct MemoryBatch<'a> {
    store: &'a MemoryStore,
    pending: BTreeMap<String, Option<Vec<u8>>>,
}

impl KvBatch for MemoryBatch<'_> {
    fn has(&self, key: &str) -> StoreResult<bool> {
        match self.pending.get(key) {
            Some(staged) => Ok(staged.is_some()),
            None => self.store.has(key),
        }
    }

    fn get(&self, key: &str) -> StoreResult<Option<Vec<u8>>> {
        match self.pending.get(key) {
            Some(staged) => Ok(staged.clone()),
            None => self.store.get(key),
        }
    }

    fn set(&mut self, key: &str, value: Vec<u8>) -> StoreResult<()> {
        self.pending.insert(key.to_string(), Some(value));
        Ok(())
    }

    fn delete(&mut self, key: &str) -> StoreResult<()> {
        self.pending.insert(key.to_string(), None);
        Ok(())
    }

    fn commit(self: Box<Self>) -> StoreResult<()> {
        let MemoryBatch { store, pending } = *self;
        let mut data = store.write();
        for (key, staged) in pending {
            match staged {
                Some(value) => {
                    data.insert(key, value);
                }
                None => {
                    data.remove(&key);
                }
            }
        }
        Ok(())
    }

    fn discard(self: Box<Self>) {}
}
