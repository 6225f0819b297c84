//! Authenticated encryption sessions with explicit IV handling.
//!
//! One scheme for the life of a key generation: AES-256-GCM, 96-bit IV,
//! 128-bit tag. Encryption always generates the IV internally; decryption
//! always takes the IV recorded at encryption time. The associated data binds
//! every ciphertext to its key alias and the record label, so a record cannot
//! be replayed under another alias.

use std::sync::Arc;

use zeroize::Zeroizing;

use crate::auth::Capability;
use crate::error::{VaultError, VaultResult};
use crate::keystore::{KeyHandle, KeystoreBackend};

/// AES-GCM IV length in bytes.
pub const IV_LEN: usize = 12;

/// AES-GCM authentication tag length in bytes.
pub const TAG_LEN: usize = 16;

/// Domain-separation label authenticated with every secret record.
const RECORD_LABEL: &[u8] = b"credvault:secret-record";

/// Performs the vault's AEAD operations through the keystore backend.
pub struct CipherSession<B> {
    backend: Arc<B>,
}

impl<B: KeystoreBackend> CipherSession<B> {
    /// Creates a session over the given backend.
    pub const fn new(backend: Arc<B>) -> Self {
        Self { backend }
    }

    fn associated_data(handle: &KeyHandle) -> Vec<u8> {
        let alias = handle.alias().as_bytes();
        let mut aad = Vec::with_capacity(alias.len() + RECORD_LABEL.len());
        aad.extend_from_slice(alias);
        aad.extend_from_slice(RECORD_LABEL);
        aad
    }

    /// Encrypts `plaintext` under the handle's key with a fresh random IV.
    ///
    /// No capability is needed: hardware keys permit unauthenticated encrypt.
    /// Empty plaintexts are valid.
    ///
    /// # Errors
    ///
    /// Propagates backend failures, including
    /// [`VaultError::KeyPermanentlyInvalidated`] for a revoked handle.
    pub fn encrypt(
        &self,
        handle: &KeyHandle,
        plaintext: &[u8],
    ) -> VaultResult<(Vec<u8>, [u8; IV_LEN])> {
        self.backend
            .encrypt(handle, &Self::associated_data(handle), plaintext)
    }

    /// Decrypts `ciphertext` with the IV recorded at encryption time.
    ///
    /// Consumes the capability: one granted ceremony authorizes exactly one
    /// decrypt. The capability must have been minted for this handle.
    ///
    /// # Errors
    ///
    /// * [`VaultError::Unexpected`] if the capability was minted for a
    ///   different key generation (a caller bug, never retried into success).
    /// * [`VaultError::CorruptRecord`] if ciphertext, IV, key, and associated
    ///   data do not jointly validate. The record is unusable; the caller must
    ///   treat the secret as lost.
    pub fn decrypt(
        &self,
        handle: &KeyHandle,
        capability: Capability,
        iv: &[u8; IV_LEN],
        ciphertext: &[u8],
    ) -> VaultResult<Zeroizing<Vec<u8>>> {
        if capability.generation() != handle.generation() {
            return Err(VaultError::Unexpected(
                "capability was minted for a different key generation".to_string(),
            ));
        }
        self.backend
            .decrypt(handle, &Self::associated_data(handle), iv, ciphertext)
            .map(Zeroizing::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyPolicy;
    use crate::keystore::SoftwareKeystore;

    fn session_with_key() -> (CipherSession<SoftwareKeystore>, KeyHandle) {
        let backend = Arc::new(SoftwareKeystore::new());
        let handle = backend.generate_key("alias", KeyPolicy::default()).unwrap();
        (CipherSession::new(backend), handle)
    }

    #[test]
    fn test_roundtrip_with_recorded_iv() {
        let (session, handle) = session_with_key();
        let (ciphertext, iv) = session.encrypt(&handle, b"sk-abc123").unwrap();
        assert_eq!(ciphertext.len(), b"sk-abc123".len() + TAG_LEN);

        let plaintext = session
            .decrypt(&handle, Capability::new(handle.generation()), &iv, &ciphertext)
            .unwrap();
        assert_eq!(plaintext.as_slice(), b"sk-abc123");
    }

    #[test]
    fn test_empty_plaintext_is_valid() {
        let (session, handle) = session_with_key();
        let (ciphertext, iv) = session.encrypt(&handle, b"").unwrap();
        let plaintext = session
            .decrypt(&handle, Capability::new(handle.generation()), &iv, &ciphertext)
            .unwrap();
        assert!(plaintext.is_empty());
    }

    #[test]
    fn test_fresh_iv_per_encryption() {
        let (session, handle) = session_with_key();
        let (_, iv_one) = session.encrypt(&handle, b"same").unwrap();
        let (_, iv_two) = session.encrypt(&handle, b"same").unwrap();
        assert_ne!(iv_one, iv_two);
    }

    #[test]
    fn test_capability_for_other_generation_rejected() {
        let (session, handle) = session_with_key();
        let (ciphertext, iv) = session.encrypt(&handle, b"data").unwrap();

        let wrong = Capability::new(handle.generation() + 1);
        let result = session.decrypt(&handle, wrong, &iv, &ciphertext);
        assert!(matches!(result, Err(VaultError::Unexpected(_))));
    }

    #[test]
    fn test_tampered_ciphertext_fails_closed() {
        let (session, handle) = session_with_key();
        let (mut ciphertext, iv) = session.encrypt(&handle, b"data").unwrap();
        ciphertext[0] ^= 0x01;

        let result = session.decrypt(
            &handle,
            Capability::new(handle.generation()),
            &iv,
            &ciphertext,
        );
        assert!(matches!(result, Err(VaultError::CorruptRecord)));
    }
}
