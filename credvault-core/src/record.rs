//! Persisted secret record envelope.
//!
//! The ciphertext, its IV, and the schema tag travel as one CBOR blob so the
//! store can only ever persist or delete them together. Anything that fails
//! to decode, carries an unknown schema version, or has a wrong-length IV
//! (records from the legacy CBC scheme) is reported as
//! [`VaultError::CorruptRecord`] and handled by the vault's recovery wipe.

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::cipher::IV_LEN;
use crate::error::{VaultError, VaultResult};

/// Current schema version of the persisted record.
pub const SCHEMA_VERSION: u32 = 1;

/// Ciphertext, IV, and schema tag persisted as one unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretRecord {
    /// Envelope schema version.
    pub schema_version: u32,
    /// Per-encryption random IV recorded at encryption time.
    pub iv: Vec<u8>,
    /// AES-256-GCM ciphertext with the authentication tag appended.
    pub ciphertext: Vec<u8>,
}

impl SecretRecord {
    /// Builds a current-schema record from an encryption result.
    #[must_use]
    pub fn new(iv: [u8; IV_LEN], ciphertext: Vec<u8>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            iv: iv.to_vec(),
            ciphertext,
        }
    }

    /// Serializes the record to its CBOR envelope.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::Unexpected`] if CBOR serialization fails.
    pub fn encode(&self) -> VaultResult<Vec<u8>> {
        let mut bytes = Vec::new();
        ciborium::ser::into_writer(self, &mut bytes)
            .map_err(|err| VaultError::Unexpected(format!("record encode: {err}")))?;
        Ok(bytes)
    }

    /// Parses and validates a CBOR envelope.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::CorruptRecord`] for undecodable bytes, an
    /// unsupported schema version, or an IV that is not [`IV_LEN`] bytes.
    pub fn decode(bytes: &[u8]) -> VaultResult<Self> {
        let record: Self = ciborium::de::from_reader(bytes).map_err(|err| {
            warn!(error = %err, "stored record failed to decode");
            VaultError::CorruptRecord
        })?;
        if record.schema_version != SCHEMA_VERSION {
            warn!(
                found = record.schema_version,
                expected = SCHEMA_VERSION,
                "stored record has unsupported schema version"
            );
            return Err(VaultError::CorruptRecord);
        }
        if record.iv.len() != IV_LEN {
            warn!(
                iv_len = record.iv.len(),
                "stored record has a legacy or malformed IV"
            );
            return Err(VaultError::CorruptRecord);
        }
        Ok(record)
    }

    /// The recorded IV as the fixed-size array decryption expects.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::CorruptRecord`] if the IV has the wrong length
    /// (possible only for hand-built records; [`Self::decode`] validates it).
    pub fn iv_bytes(&self) -> VaultResult<[u8; IV_LEN]> {
        self.iv
            .as_slice()
            .try_into()
            .map_err(|_| VaultError::CorruptRecord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_roundtrip() {
        let record = SecretRecord::new([7u8; IV_LEN], vec![1, 2, 3]);
        let bytes = record.encode().expect("encode");
        let decoded = SecretRecord::decode(&bytes).expect("decode");
        assert_eq!(decoded.schema_version, SCHEMA_VERSION);
        assert_eq!(decoded.iv_bytes().expect("iv"), [7u8; IV_LEN]);
        assert_eq!(decoded.ciphertext, vec![1, 2, 3]);
    }

    #[test]
    fn test_unsupported_schema_version_is_corrupt() {
        let mut record = SecretRecord::new([0u8; IV_LEN], vec![9]);
        record.schema_version = SCHEMA_VERSION + 1;
        let bytes = record.encode().expect("encode");
        assert!(matches!(
            SecretRecord::decode(&bytes),
            Err(VaultError::CorruptRecord)
        ));
    }

    #[test]
    fn test_legacy_iv_length_is_corrupt() {
        let record = SecretRecord {
            schema_version: SCHEMA_VERSION,
            iv: vec![0u8; 16],
            ciphertext: vec![1],
        };
        let bytes = record.encode().expect("encode");
        assert!(matches!(
            SecretRecord::decode(&bytes),
            Err(VaultError::CorruptRecord)
        ));
    }

    #[test]
    fn test_garbage_bytes_are_corrupt() {
        assert!(matches!(
            SecretRecord::decode(b"not cbor at all"),
            Err(VaultError::CorruptRecord)
        ));
    }
}
