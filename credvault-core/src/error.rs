//! Error types for the vault and its platform seams.

use thiserror::Error;

use crate::auth::AuthFailure;

/// Result type for vault operations.
pub type VaultResult<T> = Result<T, VaultError>;

/// Errors raised by the vault and the components it orchestrates.
///
/// Retriable conditions (`NotAuthenticated`, `OperationInProgress`,
/// `KeyUnavailable`) can simply be retried by the caller. `CorruptRecord` and
/// `KeyPermanentlyInvalidated` mean the vault has already wiped the key and the
/// stored record; the user must re-enter the secret.
#[derive(Debug, Error)]
pub enum VaultError {
    /// The keystore could not create a key satisfying the requested policy,
    /// e.g. presence-gated use was requested but no authentication method is
    /// enrolled on the device. Fatal until the user fixes device security
    /// settings; never retried automatically.
    #[error("key generation failed: {0}")]
    KeyGeneration(String),

    /// The platform reported the key permanently unusable (enrolled
    /// credentials changed). The vault wipes the key and record.
    #[error("key permanently invalidated")]
    KeyPermanentlyInvalidated,

    /// The keystore failed transiently; the key is still expected to exist.
    #[error("keystore unavailable: {0}")]
    KeyUnavailable(String),

    /// The presence ceremony ended without a grant. Retriable.
    #[error("not authenticated: {0}")]
    NotAuthenticated(AuthFailure),

    /// A ceremony is already waiting for the user; the duplicate request was
    /// rejected rather than queued.
    #[error("an authorization ceremony is already pending")]
    AuthAlreadyPending,

    /// The stored record failed authentication or could not be decoded. The
    /// vault wipes the key and record; the secret is lost.
    #[error("stored record is corrupt or failed authentication")]
    CorruptRecord,

    /// Another vault operation holds the state machine. Retriable.
    #[error("another vault operation is in progress")]
    OperationInProgress,

    /// Nothing has been stored yet. Expected on first use, not a fault.
    #[error("no secret stored")]
    NoSecretStored,

    /// The blob store failed to read, write, or delete the record.
    #[error("secret store error: {0}")]
    Store(String),

    /// Any other failure, with the underlying cause preserved for diagnostics.
    #[error("unexpected vault error: {0}")]
    Unexpected(String),
}

impl VaultError {
    /// Whether the caller may simply retry the operation.
    #[must_use]
    pub const fn is_retriable(&self) -> bool {
        matches!(
            self,
            Self::NotAuthenticated(_) | Self::OperationInProgress | Self::KeyUnavailable(_)
        )
    }

    /// Whether this error caused the vault to wipe the key and record.
    #[must_use]
    pub const fn wiped_vault(&self) -> bool {
        matches!(self, Self::KeyPermanentlyInvalidated | Self::CorruptRecord)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retriable_classification() {
        assert!(VaultError::OperationInProgress.is_retriable());
        assert!(VaultError::NotAuthenticated(AuthFailure::Denied).is_retriable());
        assert!(!VaultError::CorruptRecord.is_retriable());
        assert!(!VaultError::KeyGeneration("no enrollment".to_string()).is_retriable());
    }

    #[test]
    fn test_wipe_classification() {
        assert!(VaultError::KeyPermanentlyInvalidated.wiped_vault());
        assert!(VaultError::CorruptRecord.wiped_vault());
        assert!(!VaultError::NoSecretStored.wiped_vault());
    }
}
