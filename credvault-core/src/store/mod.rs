//! Durable persistence of the secret record.
//!
//! The [`AtomicBlobStore`] trait is the platform seam: writes must be
//! all-or-nothing so the ciphertext and its IV are never visible separately.
//! [`SecretStore`] layers the versioned record envelope on top and manages
//! the single blob the vault owns.

mod file;
mod memory;

pub use file::FileBlobStore;
pub use memory::MemoryBlobStore;

use std::sync::Arc;

use tracing::debug;

use crate::error::VaultResult;
use crate::record::SecretRecord;

/// Atomic blob persistence for small binary files.
pub trait AtomicBlobStore: Send + Sync {
    /// Reads the blob stored under `name`, if present.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    fn read(&self, name: &str) -> VaultResult<Option<Vec<u8>>>;

    /// Writes `bytes` under `name` atomically: readers observe either the
    /// previous blob or the new one, never a mix.
    ///
    /// # Errors
    ///
    /// Returns an error if the write fails.
    fn write_atomic(&self, name: &str, bytes: &[u8]) -> VaultResult<()>;

    /// Deletes the blob under `name`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error if the delete fails for reasons other than absence.
    fn delete(&self, name: &str) -> VaultResult<()>;
}

impl<S: AtomicBlobStore + ?Sized> AtomicBlobStore for Arc<S> {
    fn read(&self, name: &str) -> VaultResult<Option<Vec<u8>>> {
        (**self).read(name)
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> VaultResult<()> {
        (**self).write_atomic(name, bytes)
    }

    fn delete(&self, name: &str) -> VaultResult<()> {
        (**self).delete(name)
    }
}

/// Typed store for the vault's single secret record.
pub struct SecretStore<S> {
    blobs: S,
    name: String,
}

impl<S: AtomicBlobStore> SecretStore<S> {
    /// Creates a store persisting the record under `name`.
    pub fn new(blobs: S, name: impl Into<String>) -> Self {
        Self {
            blobs,
            name: name.into(),
        }
    }

    /// Persists `record`, replacing any existing one.
    ///
    /// # Errors
    ///
    /// Propagates envelope encoding and blob write failures.
    pub fn put(&self, record: &SecretRecord) -> VaultResult<()> {
        let bytes = record.encode()?;
        self.blobs.write_atomic(&self.name, &bytes)?;
        debug!(name = %self.name, "secret record written");
        Ok(())
    }

    /// Loads the stored record, if any.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VaultError::CorruptRecord`] when stored bytes exist
    /// but fail to decode; callers treat this exactly like an authentication
    /// failure and run the recovery wipe.
    pub fn get(&self) -> VaultResult<Option<SecretRecord>> {
        match self.blobs.read(&self.name)? {
            None => Ok(None),
            Some(bytes) => SecretRecord::decode(&bytes).map(Some),
        }
    }

    /// Removes the stored record. Idempotent.
    ///
    /// # Errors
    ///
    /// Propagates blob delete failures.
    pub fn clear(&self) -> VaultResult<()> {
        self.blobs.delete(&self.name)
    }

    /// Whether a record blob exists, decodable or not.
    ///
    /// # Errors
    ///
    /// Propagates blob read failures.
    pub fn has_record(&self) -> VaultResult<bool> {
        Ok(self.blobs.read(&self.name)?.is_some())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cipher::IV_LEN;
    use crate::error::VaultError;

    #[test]
    fn test_put_get_clear() {
        let store = SecretStore::new(MemoryBlobStore::new(), "record");
        assert!(!store.has_record().unwrap());
        assert!(store.get().unwrap().is_none());

        store
            .put(&SecretRecord::new([1u8; IV_LEN], vec![4, 5, 6]))
            .unwrap();
        assert!(store.has_record().unwrap());
        let record = store.get().unwrap().expect("record");
        assert_eq!(record.ciphertext, vec![4, 5, 6]);

        store.clear().unwrap();
        store.clear().unwrap();
        assert!(!store.has_record().unwrap());
    }

    #[test]
    fn test_put_overwrites_previous_record() {
        let store = SecretStore::new(MemoryBlobStore::new(), "record");
        store
            .put(&SecretRecord::new([1u8; IV_LEN], vec![1]))
            .unwrap();
        store
            .put(&SecretRecord::new([2u8; IV_LEN], vec![2]))
            .unwrap();

        let record = store.get().unwrap().expect("record");
        assert_eq!(record.iv_bytes().unwrap(), [2u8; IV_LEN]);
        assert_eq!(record.ciphertext, vec![2]);
    }

    #[test]
    fn test_undecodable_blob_is_corrupt_but_present() {
        let blobs = Arc::new(MemoryBlobStore::new());
        let store = SecretStore::new(Arc::clone(&blobs), "record");

        blobs.write_atomic("record", b"legacy garbage").unwrap();
        assert!(store.has_record().unwrap());
        assert!(matches!(store.get(), Err(VaultError::CorruptRecord)));
    }
}
