//! Lifecycle management for the vault's single key alias.

use std::sync::Arc;

use tracing::info;

use crate::config::KeyPolicy;
use crate::error::{VaultError, VaultResult};

use super::{KeyHandle, KeystoreBackend};

/// Owns the lifecycle of one hardware-backed key.
///
/// The manager is the only component that creates or deletes the key; the
/// vault serializes all calls through its own state machine.
pub struct KeyManager<B> {
    backend: Arc<B>,
    alias: String,
}

impl<B: KeystoreBackend> KeyManager<B> {
    /// Creates a manager for `alias` on the given backend.
    pub fn new(backend: Arc<B>, alias: impl Into<String>) -> Self {
        Self {
            backend,
            alias: alias.into(),
        }
    }

    /// Returns the existing key, or generates it lazily under `policy`.
    ///
    /// # Errors
    ///
    /// Propagates [`VaultError::KeyPermanentlyInvalidated`] from the lookup
    /// (the caller decides whether to wipe and regenerate) and
    /// [`VaultError::KeyGeneration`] when the policy cannot be satisfied.
    pub fn ensure_key(&self, policy: KeyPolicy) -> VaultResult<KeyHandle> {
        if let Some(handle) = self.backend.load_key(&self.alias)? {
            return Ok(handle);
        }
        let handle = self.backend.generate_key(&self.alias, policy)?;
        info!(alias = %self.alias, "generated vault key");
        Ok(handle)
    }

    /// Returns the live key without creating one.
    ///
    /// # Errors
    ///
    /// Same failure surface as [`KeystoreBackend::load_key`].
    pub fn load(&self) -> VaultResult<Option<KeyHandle>> {
        self.backend.load_key(&self.alias)
    }

    /// Whether the alias currently holds key material, usable or not.
    ///
    /// # Errors
    ///
    /// Propagates transient lookup failures; permanent invalidation still
    /// counts as existing (the alias must be deleted to recover).
    pub fn exists(&self) -> VaultResult<bool> {
        match self.backend.load_key(&self.alias) {
            Ok(handle) => Ok(handle.is_some()),
            Err(VaultError::KeyPermanentlyInvalidated) => Ok(true),
            Err(err) => Err(err),
        }
    }

    /// Deletes the key material. Idempotent.
    ///
    /// Any outstanding capability dies with the key: the next generation of
    /// the alias has a different generation number.
    ///
    /// # Errors
    ///
    /// Propagates backend failures other than a missing key.
    pub fn delete(&self) -> VaultResult<()> {
        self.backend.delete_key(&self.alias)
    }
}
