//! In-memory blob store for tests.

use std::collections::HashMap;
use std::sync::Mutex;

use crate::error::{VaultError, VaultResult};

use super::AtomicBlobStore;

/// In-memory [`AtomicBlobStore`] backed by a mutex-guarded map.
///
/// **FOR TESTING ONLY** — nothing survives the process. Share it between a
/// vault and a test via `Arc` to inspect or tamper with stored bytes.
pub struct MemoryBlobStore {
    blobs: Mutex<HashMap<String, Vec<u8>>>,
}

impl MemoryBlobStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self {
            blobs: Mutex::new(HashMap::new()),
        }
    }
}

impl Default for MemoryBlobStore {
    fn default() -> Self {
        Self::new()
    }
}

impl AtomicBlobStore for MemoryBlobStore {
    fn read(&self, name: &str) -> VaultResult<Option<Vec<u8>>> {
        let blobs = self
            .blobs
            .lock()
            .map_err(|_| VaultError::Store("blob mutex poisoned".to_string()))?;
        Ok(blobs.get(name).cloned())
    }

    fn write_atomic(&self, name: &str, bytes: &[u8]) -> VaultResult<()> {
        self.blobs
            .lock()
            .map_err(|_| VaultError::Store("blob mutex poisoned".to_string()))?
            .insert(name.to_string(), bytes.to_vec());
        Ok(())
    }

    fn delete(&self, name: &str) -> VaultResult<()> {
        self.blobs
            .lock()
            .map_err(|_| VaultError::Store("blob mutex poisoned".to_string()))?
            .remove(name);
        Ok(())
    }
}
