//! In-process reference backend with real AES-256-GCM.
//!
//! **Not a secure element.** Key material lives in process memory (zeroized on
//! drop). This backend exists for tests and for platforms without hardware
//! key storage; real deployments implement [`KeystoreBackend`] over the
//! platform keystore.
//!
//! The simulation controls mirror the platform semantics the vault must
//! survive: [`SoftwareKeystore::set_enrolled`] models whether the user has a
//! fingerprint/PIN enrolled at all, and [`SoftwareKeystore::change_enrollment`]
//! models an enrollment change, which permanently invalidates every
//! presence-gated key.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Mutex;

use aes_gcm::aead::{Aead, KeyInit, Payload};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use rand::rngs::OsRng;
use rand::RngCore;
use tracing::debug;
use zeroize::Zeroize;

use crate::cipher::IV_LEN;
use crate::config::KeyPolicy;
use crate::error::{VaultError, VaultResult};

use super::{KeyHandle, KeystoreBackend};

struct Slot {
    key: [u8; 32],
    generation: u64,
    policy: KeyPolicy,
    invalidated: bool,
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.key.zeroize();
    }
}

/// Software [`KeystoreBackend`] holding keys behind an in-process mutex.
pub struct SoftwareKeystore {
    slots: Mutex<HashMap<String, Slot>>,
    enrolled: AtomicBool,
    next_generation: AtomicU64,
}

impl SoftwareKeystore {
    /// Creates an empty keystore with an enrolled authentication method.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            enrolled: AtomicBool::new(true),
            next_generation: AtomicU64::new(1),
        }
    }

    /// Simulates enrolling or removing the device authentication method.
    ///
    /// With no method enrolled, generating a presence-gated key fails the way
    /// the platform fails it.
    pub fn set_enrolled(&self, enrolled: bool) {
        self.enrolled.store(enrolled, Ordering::Release);
    }

    /// Simulates the user changing their enrolled credentials.
    ///
    /// Every presence-gated key becomes permanently invalidated, exactly as
    /// the platform invalidates keys when fingerprints are added or removed.
    ///
    /// # Panics
    ///
    /// Panics if the slot mutex is poisoned.
    pub fn change_enrollment(&self) {
        let mut slots = self.slots.lock().expect("slot mutex poisoned");
        for (alias, slot) in slots.iter_mut() {
            if slot.policy.auth_required {
                debug!(alias = %alias, "key invalidated by enrollment change");
                slot.invalidated = true;
            }
        }
    }

    fn with_slot<R>(
        &self,
        handle: &KeyHandle,
        f: impl FnOnce(&Slot) -> VaultResult<R>,
    ) -> VaultResult<R> {
        let slots = self
            .slots
            .lock()
            .map_err(|_| VaultError::KeyUnavailable("keystore mutex poisoned".to_string()))?;
        let slot = slots
            .get(handle.alias())
            .ok_or(VaultError::KeyPermanentlyInvalidated)?;
        // A stale generation means the material this handle referred to is
        // gone, which is indistinguishable from invalidation to the caller.
        if slot.invalidated || slot.generation != handle.generation() {
            return Err(VaultError::KeyPermanentlyInvalidated);
        }
        f(slot)
    }
}

impl Default for SoftwareKeystore {
    fn default() -> Self {
        Self::new()
    }
}

impl KeystoreBackend for SoftwareKeystore {
    fn generate_key(&self, alias: &str, policy: KeyPolicy) -> VaultResult<KeyHandle> {
        if policy.auth_required && !self.enrolled.load(Ordering::Acquire) {
            return Err(VaultError::KeyGeneration(
                "no enrolled authentication method".to_string(),
            ));
        }

        let mut key = [0u8; 32];
        OsRng.fill_bytes(&mut key);
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);

        let mut slots = self
            .slots
            .lock()
            .map_err(|_| VaultError::KeyUnavailable("keystore mutex poisoned".to_string()))?;
        slots.insert(
            alias.to_string(),
            Slot {
                key,
                generation,
                policy,
                invalidated: false,
            },
        );
        debug!(alias, generation, "generated key");
        Ok(KeyHandle::new(alias, generation, policy))
    }

    fn load_key(&self, alias: &str) -> VaultResult<Option<KeyHandle>> {
        let slots = self
            .slots
            .lock()
            .map_err(|_| VaultError::KeyUnavailable("keystore mutex poisoned".to_string()))?;
        match slots.get(alias) {
            None => Ok(None),
            Some(slot) if slot.invalidated => Err(VaultError::KeyPermanentlyInvalidated),
            Some(slot) => Ok(Some(KeyHandle::new(alias, slot.generation, slot.policy))),
        }
    }

    fn delete_key(&self, alias: &str) -> VaultResult<()> {
        let mut slots = self
            .slots
            .lock()
            .map_err(|_| VaultError::KeyUnavailable("keystore mutex poisoned".to_string()))?;
        if slots.remove(alias).is_some() {
            debug!(alias, "deleted key");
        }
        Ok(())
    }

    fn encrypt(
        &self,
        handle: &KeyHandle,
        aad: &[u8],
        plaintext: &[u8],
    ) -> VaultResult<(Vec<u8>, [u8; IV_LEN])> {
        self.with_slot(handle, |slot| {
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&slot.key));
            let mut iv = [0u8; IV_LEN];
            OsRng.fill_bytes(&mut iv);
            let ciphertext = cipher
                .encrypt(
                    Nonce::from_slice(&iv),
                    Payload {
                        msg: plaintext,
                        aad,
                    },
                )
                .map_err(|_| {
                    VaultError::Unexpected("AES-256-GCM encryption failed".to_string())
                })?;
            Ok((ciphertext, iv))
        })
    }

    fn decrypt(
        &self,
        handle: &KeyHandle,
        aad: &[u8],
        iv: &[u8; IV_LEN],
        ciphertext: &[u8],
    ) -> VaultResult<Vec<u8>> {
        self.with_slot(handle, |slot| {
            let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(&slot.key));
            cipher
                .decrypt(
                    Nonce::from_slice(iv),
                    Payload {
                        msg: ciphertext,
                        aad,
                    },
                )
                .map_err(|_| VaultError::CorruptRecord)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn gated_policy() -> KeyPolicy {
        KeyPolicy::default()
    }

    fn ungated_policy() -> KeyPolicy {
        KeyPolicy {
            auth_required: false,
            ..KeyPolicy::default()
        }
    }

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let keystore = SoftwareKeystore::new();
        let handle = keystore.generate_key("k", gated_policy()).unwrap();

        let (ciphertext, iv) = keystore.encrypt(&handle, b"aad", b"sk-abc123").unwrap();
        assert_ne!(&ciphertext[..9], b"sk-abc123");

        let plaintext = keystore.decrypt(&handle, b"aad", &iv, &ciphertext).unwrap();
        assert_eq!(plaintext, b"sk-abc123");
    }

    #[test]
    fn test_aad_mismatch_fails_authentication() {
        let keystore = SoftwareKeystore::new();
        let handle = keystore.generate_key("k", gated_policy()).unwrap();

        let (ciphertext, iv) = keystore.encrypt(&handle, b"aad-one", b"data").unwrap();
        let result = keystore.decrypt(&handle, b"aad-two", &iv, &ciphertext);
        assert!(matches!(result, Err(VaultError::CorruptRecord)));
    }

    #[test]
    fn test_generation_without_enrollment_fails() {
        let keystore = SoftwareKeystore::new();
        keystore.set_enrolled(false);

        let gated = keystore.generate_key("k", gated_policy());
        assert!(matches!(gated, Err(VaultError::KeyGeneration(_))));

        // Keys that do not gate decryption are unaffected.
        assert!(keystore.generate_key("k", ungated_policy()).is_ok());
    }

    #[test]
    fn test_enrollment_change_invalidates_gated_keys_only() {
        let keystore = SoftwareKeystore::new();
        let gated = keystore.generate_key("gated", gated_policy()).unwrap();
        let ungated = keystore.generate_key("ungated", ungated_policy()).unwrap();

        keystore.change_enrollment();

        assert!(matches!(
            keystore.load_key("gated"),
            Err(VaultError::KeyPermanentlyInvalidated)
        ));
        assert!(keystore.load_key("ungated").unwrap().is_some());

        let (ciphertext, iv) = keystore.encrypt(&ungated, b"", b"x").unwrap();
        assert!(keystore.decrypt(&ungated, b"", &iv, &ciphertext).is_ok());

        let result = keystore.encrypt(&gated, b"", b"x");
        assert!(matches!(result, Err(VaultError::KeyPermanentlyInvalidated)));
    }

    #[test]
    fn test_stale_handle_after_regeneration_is_dead() {
        let keystore = SoftwareKeystore::new();
        let old = keystore.generate_key("k", gated_policy()).unwrap();
        let (ciphertext, iv) = keystore.encrypt(&old, b"", b"secret").unwrap();

        keystore.delete_key("k").unwrap();
        let new = keystore.generate_key("k", gated_policy()).unwrap();
        assert_ne!(old.generation(), new.generation());

        let stale = keystore.decrypt(&old, b"", &iv, &ciphertext);
        assert!(matches!(stale, Err(VaultError::KeyPermanentlyInvalidated)));
    }

    #[test]
    fn test_delete_is_idempotent() {
        let keystore = SoftwareKeystore::new();
        keystore.generate_key("k", gated_policy()).unwrap();
        keystore.delete_key("k").unwrap();
        keystore.delete_key("k").unwrap();
        assert!(keystore.load_key("k").unwrap().is_none());
    }
}
