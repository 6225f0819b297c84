//! Hardware keystore seam and key lifecycle management.
//!
//! The vault never touches key material. All cryptographic use goes through
//! the [`KeystoreBackend`] trait, which platform integrations implement over
//! the device keystore (Android Keystore, Keychain Services, a TPM). Only
//! opaque [`KeyHandle`]s and AEAD operations cross the boundary.
//!
//! The crate ships one implementation, [`SoftwareKeystore`], an in-process
//! reference backend used in tests and on platforms without a secure element.

mod manager;
mod software;

pub use manager::KeyManager;
pub use software::SoftwareKeystore;

use crate::cipher::IV_LEN;
use crate::config::KeyPolicy;
use crate::error::VaultResult;

/// Opaque handle to a hardware-backed key.
///
/// The generation increases every time the key material behind an alias is
/// replaced, so handles (and the capabilities minted for them) from before a
/// delete-and-regenerate cycle can never touch the new key.
#[derive(Debug, Clone)]
pub struct KeyHandle {
    alias: String,
    generation: u64,
    policy: KeyPolicy,
}

impl KeyHandle {
    pub(crate) fn new(alias: impl Into<String>, generation: u64, policy: KeyPolicy) -> Self {
        Self {
            alias: alias.into(),
            generation,
            policy,
        }
    }

    /// Alias of the key this handle refers to.
    #[must_use]
    pub fn alias(&self) -> &str {
        &self.alias
    }

    /// Generation of the key material behind the alias.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Policy the key was generated with.
    #[must_use]
    pub const fn policy(&self) -> KeyPolicy {
        self.policy
    }
}

/// Device keystore operations the vault depends on.
///
/// # Security Requirements
///
/// * Key material MUST stay inside the backend; only handles cross this trait.
/// * `encrypt`/`decrypt` MUST use AES-256-GCM with a 128-bit tag, generating a
///   fresh random IV per encryption and authenticating `aad`.
/// * A key whose usability was permanently lost (enrolled credentials changed)
///   MUST surface [`crate::VaultError::KeyPermanentlyInvalidated`], never a
///   generic failure, so the vault can run its wipe-and-restart recovery.
pub trait KeystoreBackend: Send + Sync {
    /// Generates (or replaces) the key behind `alias` under `policy`.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VaultError::KeyGeneration`] when the policy cannot be
    /// satisfied, e.g. presence-gated use with no enrolled method.
    fn generate_key(&self, alias: &str, policy: KeyPolicy) -> VaultResult<KeyHandle>;

    /// Looks up the live key behind `alias`, if any.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VaultError::KeyPermanentlyInvalidated`] when the alias
    /// exists but the platform has revoked its usability, and
    /// [`crate::VaultError::KeyUnavailable`] for transient lookup failures.
    fn load_key(&self, alias: &str) -> VaultResult<Option<KeyHandle>>;

    /// Removes the key behind `alias`. Idempotent.
    ///
    /// # Errors
    ///
    /// Returns an error only for non-missing-key failures.
    fn delete_key(&self, alias: &str) -> VaultResult<()>;

    /// Encrypts `plaintext` under the handle's key, authenticating `aad`.
    ///
    /// Returns the ciphertext (tag appended) and the freshly generated IV.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VaultError::KeyPermanentlyInvalidated`] for a stale or
    /// revoked handle.
    fn encrypt(
        &self,
        handle: &KeyHandle,
        aad: &[u8],
        plaintext: &[u8],
    ) -> VaultResult<(Vec<u8>, [u8; IV_LEN])>;

    /// Decrypts `ciphertext` under the handle's key with the recorded `iv`,
    /// verifying `aad` and the authentication tag.
    ///
    /// # Errors
    ///
    /// Returns [`crate::VaultError::CorruptRecord`] when ciphertext, IV, key,
    /// and aad do not jointly validate, and
    /// [`crate::VaultError::KeyPermanentlyInvalidated`] for a stale or revoked
    /// handle.
    fn decrypt(
        &self,
        handle: &KeyHandle,
        aad: &[u8],
        iv: &[u8; IV_LEN],
        ciphertext: &[u8],
    ) -> VaultResult<Vec<u8>>;
}
