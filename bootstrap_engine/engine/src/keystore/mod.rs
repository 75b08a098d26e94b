//! Key-share store contract.
//!
//! Shares and the root credential live outside the server in a pluggable
//! store (a cloud KMS-backed bucket, a secret manager, ...). The engine only
//! needs three operations from it, plus a create-only write built on top.

pub mod memory;

use zeroize::Zeroizing;

use crate::error::KeyStoreError;

pub use memory::MemoryKeyStore;

/// Trait for pluggable share storage.
pub trait KeyStore: Send + Sync {
    /// Fetch a value. A missing key must come back as `KeyStoreError::NotFound`.
    fn get(&self, name: &str) -> Result<Zeroizing<Vec<u8>>, KeyStoreError>;

    /// Store a value. Fails with `AlreadyExists` when the key is present.
    fn set(&self, name: &str, value: &[u8]) -> Result<(), KeyStoreError>;

    /// Round-trip a disposable key to prove the backend is usable.
    fn test(&self, name: &str) -> Result<(), KeyStoreError>;

    /// Create-only write.
    ///
    /// The default is check-then-act (`get` miss, then `set`) and is not
    /// atomic: two writers can both see the miss. Backends with a native
    /// conditional put should override this.
    fn create(&self, name: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        if self.contains(name)? {
            return Err(KeyStoreError::AlreadyExists(name.to_string()));
        }
        self.set(name, value)
    }

    /// `Ok(false)` on NotFound, `Ok(true)` on a hit, anything else propagates.
    fn contains(&self, name: &str) -> Result<bool, KeyStoreError> {
        match self.get(name) {
            Ok(_) => Ok(true),
            Err(KeyStoreError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}

impl<K: KeyStore + ?Sized> KeyStore for &K {
    fn get(&self, name: &str) -> Result<Zeroizing<Vec<u8>>, KeyStoreError> {
        (**self).get(name)
    }

    fn set(&self, name: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        (**self).set(name, value)
    }

    fn test(&self, name: &str) -> Result<(), KeyStoreError> {
        (**self).test(name)
    }

    fn create(&self, name: &str, value: &[u8]) -> Result<(), KeyStoreError> {
        (**self).create(name, value)
    }
}
