//! Key policy and vault construction parameters.

/// How long a successful presence check stays usable for decryption.
///
/// Mirrors the platform notion of authentication validity: `EveryUse` demands
/// a fresh ceremony for each reveal, `ProcessSession` keeps the vault unlocked
/// until the process exits or [`crate::vault::Vault::lock`] is called, and
/// `Seconds` caches the unlock for a bounded window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthValidity {
    /// Every decrypt requires a fresh ceremony.
    EveryUse,
    /// One grant unlocks the vault for the life of the process.
    ProcessSession,
    /// One grant unlocks the vault for the given number of seconds.
    Seconds(u32),
}

/// Policy attached to the hardware-backed key at generation time.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyPolicy {
    /// Whether decryption requires proof of user presence. Encryption never
    /// does; hardware keys permit unauthenticated encrypt with authenticated
    /// decrypt, and the vault relies on that asymmetry.
    pub auth_required: bool,
    /// Validity window for a successful presence check.
    pub validity: AuthValidity,
}

impl Default for KeyPolicy {
    fn default() -> Self {
        Self {
            auth_required: true,
            validity: AuthValidity::EveryUse,
        }
    }
}

/// Construction parameters for a [`crate::vault::Vault`].
#[derive(Debug, Clone)]
pub struct VaultConfig {
    /// Stable alias of the hardware-backed key.
    pub key_alias: String,
    /// Blob name under which the secret record is persisted.
    pub record_name: String,
    /// Policy for the key and the unlock cache.
    pub policy: KeyPolicy,
}

impl Default for VaultConfig {
    fn default() -> Self {
        Self {
            key_alias: "credvault:api-key".to_string(),
            record_name: "secret_record.bin".to_string(),
            policy: KeyPolicy::default(),
        }
    }
}
