//! Vault orchestration and state machine.
//!
//! The vault is the sole mutator of the key and the stored record. Every
//! public operation serializes through one mutex with fail-fast semantics: a
//! second concurrent call gets [`VaultError::OperationInProgress`] instead of
//! being queued. `reveal` is the only suspension point (awaiting the presence
//! ceremony); a dropped or cancelled ceremony deterministically returns the
//! vault to `KeyReady`.
//!
//! Recovery is all-or-nothing. Permanent key invalidation and record
//! corruption both run the same wipe: delete the key, clear the record,
//! re-enter `Uninitialized`. There is no partial repair.

use std::sync::Arc;
use std::time::Duration;

use secrecy::SecretString;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::auth::{AuthGate, AuthPurpose, AuthRequest};
use crate::cipher::CipherSession;
use crate::config::{AuthValidity, KeyPolicy, VaultConfig};
use crate::error::{VaultError, VaultResult};
use crate::keystore::{KeyManager, KeystoreBackend};
use crate::record::SecretRecord;
use crate::store::{AtomicBlobStore, SecretStore};

/// Externally observable vault state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VaultStatus {
    /// No key and no usable record.
    Uninitialized,
    /// Key exists; any stored secret is locked.
    KeyReady,
    /// A presence ceremony is waiting for the user.
    AuthPending,
    /// The secret is decrypted and cached per the validity policy.
    Unlocked,
    /// Mid-recovery after an unrecoverable failure; transient.
    Invalidated,
}

/// Unlock cache guarded by the operation mutex.
enum Session {
    Locked,
    Unlocked {
        secret: Zeroizing<String>,
        expires_at: Option<Instant>,
    },
}

/// Resets the published status if the reveal future is dropped mid-ceremony.
struct AuthPendingReset<'a> {
    status: &'a watch::Sender<VaultStatus>,
    armed: bool,
}

impl Drop for AuthPendingReset<'_> {
    fn drop(&mut self) {
        if self.armed {
            self.status.send_replace(VaultStatus::KeyReady);
        }
    }
}

/// Presence-gated vault for a single secret.
///
/// Construct one instance at application start and pass it by reference; the
/// surrounding application must drain the returned [`AuthRequest`] receiver
/// and answer each ceremony through its prompt UI.
pub struct Vault<B, S> {
    keys: KeyManager<B>,
    cipher: CipherSession<B>,
    records: SecretStore<S>,
    gate: AuthGate,
    policy: KeyPolicy,
    session: Mutex<Session>,
    status: watch::Sender<VaultStatus>,
}

impl<B: KeystoreBackend, S: AtomicBlobStore> Vault<B, S> {
    /// Creates a vault over the given keystore backend and blob store.
    ///
    /// Returns the vault and the ceremony receiver the application UI must
    /// drain.
    #[must_use]
    pub fn new(
        backend: Arc<B>,
        blobs: S,
        config: VaultConfig,
    ) -> (Self, mpsc::Receiver<AuthRequest>) {
        let VaultConfig {
            key_alias,
            record_name,
            policy,
        } = config;

        let keys = KeyManager::new(Arc::clone(&backend), key_alias);
        let cipher = CipherSession::new(backend);
        let records = SecretStore::new(blobs, record_name);
        let (gate, requests) = AuthGate::new();

        let initial = if matches!(keys.exists(), Ok(true)) {
            VaultStatus::KeyReady
        } else {
            VaultStatus::Uninitialized
        };
        let (status, _) = watch::channel(initial);

        (
            Self {
                keys,
                cipher,
                records,
                gate,
                policy,
                session: Mutex::new(Session::Locked),
                status,
            },
            requests,
        )
    }

    /// Encrypts and persists `secret`, replacing any previous one.
    ///
    /// Never runs a presence ceremony: hardware keys permit unauthenticated
    /// encrypt. Re-derives the key on every call, so it self-heals from
    /// `Uninitialized` and from a wiped vault.
    ///
    /// # Errors
    ///
    /// * [`VaultError::OperationInProgress`] if another operation holds the
    ///   vault.
    /// * [`VaultError::KeyGeneration`] if the key policy cannot be satisfied.
    /// * [`VaultError::KeyPermanentlyInvalidated`] if the key died mid-write;
    ///   the vault has already wiped itself and the call may be retried.
    /// * [`VaultError::Store`] if persisting the record fails.
    pub fn store(&self, secret: &str) -> VaultResult<()> {
        let mut session = self
            .session
            .try_lock()
            .map_err(|_| VaultError::OperationInProgress)?;

        let handle = match self.keys.ensure_key(self.policy) {
            Ok(handle) => handle,
            Err(VaultError::KeyPermanentlyInvalidated) => {
                // The old key is unusable anyway; wipe and start a new
                // generation so the write can proceed.
                self.recover(&mut session, "key invalidated before store");
                self.keys.ensure_key(self.policy)?
            }
            Err(err) => return Err(err),
        };
        if *self.status.borrow() == VaultStatus::Uninitialized {
            self.status.send_replace(VaultStatus::KeyReady);
        }

        let (ciphertext, iv) = match self.cipher.encrypt(&handle, secret.as_bytes()) {
            Ok(out) => out,
            Err(VaultError::KeyPermanentlyInvalidated) => {
                self.recover(&mut session, "key invalidated during encrypt");
                return Err(VaultError::KeyPermanentlyInvalidated);
            }
            Err(err) => return Err(err),
        };
        debug!(iv = %hex::encode(iv), "secret encrypted");

        self.records.put(&SecretRecord::new(iv, ciphertext))?;

        // The previous secret's unlock cache, if any, is stale now.
        *session = Session::Locked;
        self.status.send_replace(VaultStatus::KeyReady);
        info!("secret stored");
        Ok(())
    }

    /// Decrypts and returns the stored secret, running a presence ceremony if
    /// the unlock cache does not cover this call.
    ///
    /// Suspends until the application answers the ceremony; the vault imposes
    /// no timeout. On an unrecoverable failure the vault wipes itself before
    /// returning the error.
    ///
    /// # Errors
    ///
    /// * [`VaultError::OperationInProgress`] if another operation holds the
    ///   vault.
    /// * [`VaultError::NoSecretStored`] if nothing was stored; no ceremony is
    ///   started.
    /// * [`VaultError::NotAuthenticated`] if the ceremony was denied,
    ///   cancelled, or failed; retriable, the record is intact.
    /// * [`VaultError::KeyPermanentlyInvalidated`] or
    ///   [`VaultError::CorruptRecord`] after a recovery wipe; the secret is
    ///   lost and must be re-entered.
    pub async fn reveal(&self) -> VaultResult<SecretString> {
        let mut session = self
            .session
            .try_lock()
            .map_err(|_| VaultError::OperationInProgress)?;

        self.demote_if_expired(&mut session);
        if let Session::Unlocked { secret, .. } = &*session {
            debug!("serving secret from unlock cache");
            return Ok(SecretString::from(secret.as_str().to_owned()));
        }

        // An empty vault never starts a ceremony.
        let record = match self.records.get() {
            Ok(Some(record)) => record,
            Ok(None) => return Err(VaultError::NoSecretStored),
            Err(VaultError::CorruptRecord) => {
                self.recover(&mut session, "stored record failed to decode");
                return Err(VaultError::CorruptRecord);
            }
            Err(err) => return Err(err),
        };

        let handle = match self.keys.load() {
            Ok(Some(handle)) => handle,
            Ok(None) => {
                self.recover(&mut session, "record present without its key");
                return Err(VaultError::CorruptRecord);
            }
            Err(VaultError::KeyPermanentlyInvalidated) => {
                self.recover(&mut session, "key permanently invalidated");
                return Err(VaultError::KeyPermanentlyInvalidated);
            }
            Err(err) => return Err(err),
        };
        let iv = record.iv_bytes()?;

        self.status.send_replace(VaultStatus::AuthPending);
        let mut pending = AuthPendingReset {
            status: &self.status,
            armed: true,
        };
        let authorized = self.gate.authorize(AuthPurpose::Decrypt, &handle).await;
        pending.armed = false;
        drop(pending);

        let capability = match authorized {
            Ok(capability) => capability,
            Err(err) => {
                self.status.send_replace(VaultStatus::KeyReady);
                return Err(err);
            }
        };

        let plaintext = match self
            .cipher
            .decrypt(&handle, capability, &iv, &record.ciphertext)
        {
            Ok(plaintext) => plaintext,
            Err(VaultError::CorruptRecord) => {
                self.recover(&mut session, "record failed authentication");
                return Err(VaultError::CorruptRecord);
            }
            Err(VaultError::KeyPermanentlyInvalidated) => {
                self.recover(&mut session, "key invalidated during decrypt");
                return Err(VaultError::KeyPermanentlyInvalidated);
            }
            Err(err) => {
                self.status.send_replace(VaultStatus::KeyReady);
                return Err(err);
            }
        };

        let Ok(text) = std::str::from_utf8(&plaintext) else {
            self.recover(&mut session, "stored secret is not valid UTF-8");
            return Err(VaultError::CorruptRecord);
        };
        let secret = Zeroizing::new(text.to_string());
        drop(plaintext);

        let revealed = SecretString::from(secret.as_str().to_owned());
        match self.policy.validity {
            AuthValidity::EveryUse => {
                *session = Session::Locked;
                self.status.send_replace(VaultStatus::KeyReady);
            }
            AuthValidity::ProcessSession => {
                *session = Session::Unlocked {
                    secret,
                    expires_at: None,
                };
                self.status.send_replace(VaultStatus::Unlocked);
            }
            AuthValidity::Seconds(secs) => {
                *session = Session::Unlocked {
                    secret,
                    expires_at: Some(Instant::now() + Duration::from_secs(u64::from(secs))),
                };
                self.status.send_replace(VaultStatus::Unlocked);
            }
        }
        Ok(revealed)
    }

    /// Wipes the key and the stored record. Any state becomes
    /// `Uninitialized`; the user must re-enter the secret.
    ///
    /// # Errors
    ///
    /// * [`VaultError::OperationInProgress`] if another operation holds the
    ///   vault (including a pending ceremony).
    /// * [`VaultError::Store`] if clearing the record fails; the key is
    ///   deleted regardless.
    pub fn reset(&self) -> VaultResult<()> {
        let mut session = self
            .session
            .try_lock()
            .map_err(|_| VaultError::OperationInProgress)?;
        info!("vault reset by user");
        self.wipe(&mut session)
    }

    /// Drops any cached plaintext, returning `Unlocked` to `KeyReady`.
    ///
    /// # Errors
    ///
    /// Returns [`VaultError::OperationInProgress`] if another operation holds
    /// the vault.
    pub fn lock(&self) -> VaultResult<()> {
        let mut session = self
            .session
            .try_lock()
            .map_err(|_| VaultError::OperationInProgress)?;
        if matches!(*session, Session::Unlocked { .. }) {
            *session = Session::Locked;
            self.status.send_replace(VaultStatus::KeyReady);
        }
        Ok(())
    }

    /// Whether a record blob is persisted, decodable or not.
    ///
    /// # Errors
    ///
    /// Propagates blob store read failures.
    pub fn has_record(&self) -> VaultResult<bool> {
        self.records.has_record()
    }

    /// Current status. Lazily demotes an expired unlock to `KeyReady`.
    pub fn status(&self) -> VaultStatus {
        if let Ok(mut session) = self.session.try_lock() {
            self.demote_if_expired(&mut session);
        }
        *self.status.borrow()
    }

    /// Subscribes to status transitions.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<VaultStatus> {
        self.status.subscribe()
    }

    fn demote_if_expired(&self, session: &mut Session) {
        if let Session::Unlocked {
            expires_at: Some(at),
            ..
        } = session
        {
            if Instant::now() >= *at {
                debug!("unlock window expired");
                *session = Session::Locked;
                self.status.send_replace(VaultStatus::KeyReady);
            }
        }
    }

    /// Deletes the key and clears the record together, then publishes
    /// `Uninitialized`. Both deletions are attempted even if one fails.
    fn wipe(&self, session: &mut Session) -> VaultResult<()> {
        *session = Session::Locked;
        let keys = self.keys.delete();
        let records = self.records.clear();
        self.status.send_replace(VaultStatus::Uninitialized);
        keys.and(records)
    }

    /// The single recovery mechanism for unrecoverable crypto failures.
    fn recover(&self, session: &mut Session, reason: &str) {
        warn!(reason, "unrecoverable vault failure, wiping key and record");
        self.status.send_replace(VaultStatus::Invalidated);
        if let Err(err) = self.wipe(session) {
            warn!(error = %err, "post-invalidation cleanup incomplete");
        }
    }
}
