//! The root group: a JSON attribute object plus the arrays beneath it.
//!
//! Attributes live in the zarr group metadata at `/`. Intermediate groups
//! (`/sites`, `/samples`, ...) are created on demand with no attributes.

use crate::array::{ArraySpec, ChunkedArray};
use crate::store::{storage_err, Store};
use gs_common::{Error, Result};
use serde_json::{Map, Value};
use std::sync::{Mutex, MutexGuard};
use zarrs::group::{Group as ZarrGroup, GroupBuilder};
use zarrs::storage::ReadableWritableListableStorageTraits;

type RootGroup = ZarrGroup<dyn ReadableWritableListableStorageTraits>;

const METADATA_SUFFIX: &str = "/zarr.json";

pub struct Group {
    store: Store,
    root: Mutex<RootGroup>,
}

impl Group {
    /// Initialise an empty root group in `store`.
    pub fn create(store: &Store) -> Result<Self> {
        store.check_writable("/")?;
        let root = GroupBuilder::new()
            .build(store.storage(), "/")
            .map_err(|e| storage_err("/", e))?;
        root.store_metadata().map_err(|e| storage_err("/", e))?;
        Ok(Self::wrap(store, root))
    }

    /// Open the root group of an existing store.
    pub fn open(store: &Store) -> Result<Self> {
        let root = RootGroup::open(store.storage(), "/").map_err(|e| Error::Format {
            expected: "genostore group".to_string(),
            actual: format!("store without a root group ({e})"),
        })?;
        Ok(Self::wrap(store, root))
    }

    fn wrap(store: &Store, root: RootGroup) -> Self {
        Self {
            store: store.clone(),
            root: Mutex::new(root),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RootGroup> {
        match self.root.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    pub fn attrs(&self) -> Map<String, Value> {
        self.lock().attributes().clone()
    }

    pub fn attr(&self, key: &str) -> Option<Value> {
        self.lock().attributes().get(key).cloned()
    }

    pub fn set_attr(&self, key: &str, value: Value) -> Result<()> {
        self.store.check_writable("/")?;
        let mut root = self.lock();
        root.attributes_mut().insert(key.to_string(), value);
        root.store_metadata().map_err(|e| storage_err("/", e))
    }

    /// Create an array, creating its parent groups first.
    pub fn create_array(&self, path: &str, spec: ArraySpec) -> Result<ChunkedArray> {
        self.store.check_writable(path)?;
        let mut parent = String::new();
        let parents: Vec<&str> = path.split('/').collect();
        for segment in &parents[..parents.len().saturating_sub(1)] {
            parent.push('/');
            parent.push_str(segment);
            GroupBuilder::new()
                .build(self.store.storage(), &parent)
                .map_err(|e| storage_err(&parent, e))?
                .store_metadata()
                .map_err(|e| storage_err(&parent, e))?;
        }
        ChunkedArray::create(&self.store, path, spec)
    }

    pub fn array(&self, path: &str) -> Result<ChunkedArray> {
        ChunkedArray::open(&self.store, path)
    }

    /// Paths of every array node, sorted.
    pub fn array_paths(&self) -> Result<Vec<String>> {
        let mut paths = Vec::new();
        for key in self.store.keys()? {
            let Some(node) = key.strip_suffix(METADATA_SUFFIX) else {
                continue;
            };
            let Some(bytes) = self.store.get(&key)? else {
                continue;
            };
            let metadata: Value = serde_json::from_slice(&bytes)?;
            if metadata.get("node_type").and_then(Value::as_str) == Some("array") {
                paths.push(node.to_string());
            }
        }
        Ok(paths)
    }
}

impl std::fmt::Debug for Group {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Group").field("store", &self.store).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dtype::DType;
    use gs_config::CodecConfig;
    use serde_json::json;

    #[test]
    fn test_attrs_round_trip() {
        let store = Store::memory();
        let group = Group::create(&store).unwrap();
        group.set_attr("sequence_length", json!(100.0)).unwrap();
        group.set_attr("finalized", json!(false)).unwrap();
        assert_eq!(group.attr("sequence_length"), Some(json!(100.0)));
        assert_eq!(group.attrs().len(), 2);

        let reopened = Group::open(&store).unwrap();
        assert_eq!(reopened.attr("finalized"), Some(json!(false)));
    }

    #[test]
    fn test_sealed_group_rejects_attrs() {
        let store = Store::memory();
        let group = Group::create(&store).unwrap();
        store.seal();
        assert!(matches!(
            group.set_attr("x", json!(1)),
            Err(Error::Schema(_))
        ));
        assert_eq!(group.attr("x"), None);
    }

    #[test]
    fn test_array_paths_skip_groups() {
        let group = Group::create(&Store::memory()).unwrap();
        let spec = ArraySpec::new(DType::Int32, 8, CodecConfig::None);
        group.create_array("sites/position", spec).unwrap();
        group.create_array("samples/population", spec).unwrap();
        assert_eq!(
            group.array_paths().unwrap(),
            vec!["samples/population".to_string(), "sites/position".to_string()]
        );
        assert_eq!(group.array("sites/position").unwrap().len(), 0);
    }
}
