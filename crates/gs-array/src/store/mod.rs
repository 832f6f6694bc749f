//! Key/value backing for groups and arrays.
//!
//! Every node lives in a zarrs storage shared behind a [`Store`] handle.
//! In-memory containers use a `MemoryStore`. File containers stage their
//! nodes in a directory while open ([`StagedFile`]) and are packed into a
//! single checksummed file when finalized ([`StagedFile::close`]).
//!
//! A store can be sealed. Once sealed, every mutation made through this
//! crate fails, including mutations through array handles opened earlier.

mod packed;
mod staged;

pub use packed::{read_packed, CompactionReport};
pub use staged::{StagedFile, LOCK_SUFFIX, STAGING_SUFFIX};

use gs_common::{Error, Result};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use zarrs::storage::store::MemoryStore;
use zarrs::storage::{
    ListableStorageTraits, ReadableStorageTraits, ReadableWritableListableStorage, StoreKey,
    WritableStorageTraits,
};

/// Map any zarrs failure onto a storage error naming what was touched.
pub(crate) fn storage_err(context: &str, e: impl fmt::Display) -> Error {
    Error::Storage(format!("{context}: {e}"))
}

pub(crate) fn store_key(key: &str) -> Result<StoreKey> {
    StoreKey::new(key).map_err(|e| storage_err(key, e))
}

/// Shared handle to a node storage. Clones see the same nodes and seal.
#[derive(Clone)]
pub struct Store {
    storage: ReadableWritableListableStorage,
    sealed: Arc<AtomicBool>,
}

impl Store {
    pub(crate) fn new(storage: ReadableWritableListableStorage) -> Self {
        Self {
            storage,
            sealed: Arc::new(AtomicBool::new(false)),
        }
    }

    /// An empty, writable in-memory store.
    pub fn memory() -> Self {
        Self::new(Arc::new(MemoryStore::new()))
    }

    /// Refuse all further mutation.
    pub fn seal(&self) {
        self.sealed.store(true, Ordering::SeqCst);
    }

    pub fn is_sealed(&self) -> bool {
        self.sealed.load(Ordering::SeqCst)
    }

    pub(crate) fn check_writable(&self, what: &str) -> Result<()> {
        if self.is_sealed() {
            return Err(Error::Schema(format!(
                "cannot modify '{what}': store is sealed (read-only)"
            )));
        }
        Ok(())
    }

    pub(crate) fn storage(&self) -> ReadableWritableListableStorage {
        Arc::clone(&self.storage)
    }

    /// Every key held by the store, sorted.
    pub fn keys(&self) -> Result<Vec<String>> {
        let mut keys: Vec<String> = self
            .storage
            .list()
            .map_err(|e| storage_err("list", e))?
            .iter()
            .map(|k| k.as_str().to_string())
            .collect();
        keys.sort();
        Ok(keys)
    }

    /// Raw bytes under `key`, as stored (after compression).
    pub fn get(&self, key: &str) -> Result<Option<Vec<u8>>> {
        let bytes = self
            .storage
            .get(&store_key(key)?)
            .map_err(|e| storage_err(key, e))?;
        Ok(bytes.map(|b| b.to_vec()))
    }

    /// Insert raw bytes while building a fresh store; ignores the seal.
    pub(crate) fn put_unsealed(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        self.storage
            .set(&store_key(key)?, bytes.into())
            .map_err(|e| storage_err(key, e))
    }
}

impl fmt::Debug for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("sealed", &self.is_sealed())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keys_are_sorted() {
        let store = Store::memory();
        store.put_unsealed("b/zarr.json", b"{}".to_vec()).unwrap();
        store.put_unsealed("a/c/0", vec![1, 2]).unwrap();
        assert_eq!(store.keys().unwrap(), vec!["a/c/0", "b/zarr.json"]);
        assert_eq!(store.get("a/c/0").unwrap(), Some(vec![1, 2]));
        assert_eq!(store.get("missing").unwrap(), None);
    }

    #[test]
    fn test_seal_is_shared_by_clones() {
        let store = Store::memory();
        let other = store.clone();
        assert!(other.check_writable("x").is_ok());
        store.seal();
        assert!(matches!(other.check_writable("x"), Err(Error::Schema(_))));
    }
}
