use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use zeroize::Zeroizing;

use crate::error::KeyStoreError;
use crate::keystore::KeyStore;

/// In-memory share store. Clones share the same map.
///
/// `create` holds the write lock across the existence check and the insert,
/// so concurrent creates of one key have exactly one winner.
#[derive(Clone, Default)]
pub struct MemoryKeyStore {
    store: Arc<RwLock<HashMap<String, Zeroizing<Vec<u8>>>>>,
}

impl MemoryKeyStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.store.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Sorted key names, for inspection.
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self
            .store
            .read()
            .map(|s| s.keys().cloned().collect())
            .unwrap_or_default();
        keys.sort();
        keys
    }

    pub fn remove(&self, name: &str) -> Result<(), KeyStoreError> {
        let mut store = self
            .store
            .write()
            .map_err(|_| KeyStoreError::backend(name, "keystore lock poisoned"))?;
        store
            .remove(name)
            .map(|_| ())
            .ok_or_else(|| KeyStoreError::NotFound(name.to_string()))
    }
}

impl KeyStore for MemoryKeyStore {
    fn get(&self, name: &str) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        let store = self
            .store
            .read()
            .map_err(|_| KeyStoreError::backend(name, "keystore lock poisoned"))?;
        store
            .get(name)
            .cloned()
            .ok_or_else(|| KeyStoreError::NotFound(name.to_string()))
    }

    fn set(&self, name: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        self.create(name, value)
    }

    fn test(&self, name: &str) -> Result<(), KeyStoreError> {
        let probe = b"keystore-probe";
        self.create(name, probe)?;
        let read_back = self.get(name)?;
        self.remove(name)?;
        if read_back.as_slice() != probe {
            return Err(KeyStoreError::backend(name, "read back a different value"));
        }
        Ok(())
    }

    fn create(&self, name: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        let mut store = self
            .store
            .write()
            .map_err(|_| KeyStoreError::backend(name, "keystore lock poisoned"))?;
        if store.contains_key(name) {
            return Err(KeyStoreError::AlreadyExists(name.to_string()));
        }
        store.insert(name.to_string(), Zeroizing::new(value.to_vec()));
        Ok(())
    }
}
