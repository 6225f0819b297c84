//! User-presence ceremony gate and single-use capabilities.
//!
//! The gate models the biometric/device-credential prompt as a channel-based
//! request/response: the vault sends an [`AuthRequest`] and suspends, the
//! surrounding application shows its prompt UI and answers with an
//! [`AuthDecision`]. On a grant the gate mints a [`Capability`] bound to the
//! key handle of the pending decrypt; the capability is consumed by exactly
//! one decrypt call and cannot be constructed any other way.
//!
//! At most one ceremony may be outstanding. A concurrent request fails with
//! [`VaultError::AuthAlreadyPending`] instead of being queued; the pending
//! slot is released by a drop guard, so a cancelled or abandoned ceremony can
//! never leave the gate stuck.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{VaultError, VaultResult};
use crate::keystore::KeyHandle;

/// What the pending cryptographic operation will do with the key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPurpose {
    /// The key will encrypt a new secret. Never gated in practice.
    Encrypt,
    /// The key will decrypt the stored secret.
    Decrypt,
}

/// Terminal decision delivered by whoever runs the ceremony UI.
#[derive(Debug)]
pub enum AuthDecision {
    /// The user proved presence.
    Granted,
    /// The user failed the presence check.
    Denied,
    /// The user aborted the ceremony.
    Cancelled,
    /// The ceremony itself failed (sensor busy, prompt error).
    Error(String),
}

/// Why a ceremony ended without a grant. All variants are retriable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthFailure {
    /// The user failed the presence check.
    Denied,
    /// The user aborted the ceremony.
    Cancelled,
    /// The ceremony itself failed.
    Error(String),
}

impl fmt::Display for AuthFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Denied => write!(f, "denied by the user"),
            Self::Cancelled => write!(f, "cancelled by the user"),
            Self::Error(reason) => write!(f, "ceremony error: {reason}"),
        }
    }
}

/// Single-use proof that a ceremony succeeded for one key handle.
///
/// Cannot be cloned or constructed outside this module; it only exists as the
/// output of a granted ceremony and is consumed by value by the decrypt call
/// it authorizes.
#[derive(Debug)]
pub struct Capability {
    generation: u64,
}

impl Capability {
    pub(crate) const fn new(generation: u64) -> Self {
        Self { generation }
    }

    /// Generation of the key handle this capability was minted for.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }
}

/// A ceremony waiting for the user's answer.
///
/// Dropping the request without responding counts as a cancellation.
#[derive(Debug)]
pub struct AuthRequest {
    purpose: AuthPurpose,
    responder: oneshot::Sender<AuthDecision>,
}

impl AuthRequest {
    /// What the requesting operation intends to do with the key.
    #[must_use]
    pub const fn purpose(&self) -> AuthPurpose {
        self.purpose
    }

    /// Delivers the terminal decision for this ceremony.
    pub fn respond(self, decision: AuthDecision) {
        // The requester may have given up (future dropped); nothing to do.
        let _ = self.responder.send(decision);
    }
}

/// Requester side of the ceremony channel. Owned by the vault.
#[derive(Debug)]
pub struct AuthGate {
    requests: mpsc::Sender<AuthRequest>,
    pending: AtomicBool,
}

/// Releases the pending slot even when the ceremony future is dropped.
struct PendingGuard<'a>(&'a AtomicBool);

impl Drop for PendingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AuthGate {
    /// Creates a gate and the receiver the application UI must drain.
    ///
    /// The channel has capacity one: the gate never holds more than a single
    /// outstanding ceremony.
    #[must_use]
    pub fn new() -> (Self, mpsc::Receiver<AuthRequest>) {
        let (requests, receiver) = mpsc::channel(1);
        (
            Self {
                requests,
                pending: AtomicBool::new(false),
            },
            receiver,
        )
    }

    /// Runs one ceremony and, on a grant, mints a capability bound to `key`.
    ///
    /// Suspends until the application answers; there is no implicit timeout.
    ///
    /// # Errors
    ///
    /// * [`VaultError::AuthAlreadyPending`] if a ceremony is already waiting.
    /// * [`VaultError::NotAuthenticated`] for denied, cancelled, or failed
    ///   ceremonies, and when the UI side of the channel is gone.
    pub async fn authorize(
        &self,
        purpose: AuthPurpose,
        key: &KeyHandle,
    ) -> VaultResult<Capability> {
        if self.pending.swap(true, Ordering::AcqRel) {
            return Err(VaultError::AuthAlreadyPending);
        }
        let _guard = PendingGuard(&self.pending);

        let (responder, decision) = oneshot::channel();
        self.requests
            .send(AuthRequest { purpose, responder })
            .await
            .map_err(|_| {
                VaultError::NotAuthenticated(AuthFailure::Error(
                    "ceremony UI is not listening".to_string(),
                ))
            })?;
        debug!(?purpose, "presence ceremony started");

        match decision.await {
            Ok(AuthDecision::Granted) => Ok(Capability::new(key.generation())),
            Ok(AuthDecision::Denied) => Err(VaultError::NotAuthenticated(AuthFailure::Denied)),
            Ok(AuthDecision::Cancelled) | Err(_) => {
                Err(VaultError::NotAuthenticated(AuthFailure::Cancelled))
            }
            Ok(AuthDecision::Error(reason)) => {
                Err(VaultError::NotAuthenticated(AuthFailure::Error(reason)))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::KeyPolicy;

    fn test_handle(generation: u64) -> KeyHandle {
        KeyHandle::new("test-alias", generation, KeyPolicy::default())
    }

    #[tokio::test]
    async fn test_granted_ceremony_mints_bound_capability() {
        let (gate, mut requests) = AuthGate::new();
        tokio::spawn(async move {
            let request = requests.recv().await.expect("request");
            assert_eq!(request.purpose(), AuthPurpose::Decrypt);
            request.respond(AuthDecision::Granted);
        });

        let capability = gate
            .authorize(AuthPurpose::Decrypt, &test_handle(7))
            .await
            .expect("granted");
        assert_eq!(capability.generation(), 7);
    }

    #[tokio::test]
    async fn test_denied_and_cancelled_are_retriable() {
        let (gate, mut requests) = AuthGate::new();
        tokio::spawn(async move {
            requests.recv().await.expect("first").respond(AuthDecision::Denied);
            requests.recv().await.expect("second").respond(AuthDecision::Cancelled);
            // Dropping without responding counts as cancellation.
            drop(requests.recv().await.expect("third"));
        });

        let handle = test_handle(1);
        let denied = gate.authorize(AuthPurpose::Decrypt, &handle).await;
        assert!(matches!(
            denied,
            Err(VaultError::NotAuthenticated(AuthFailure::Denied))
        ));

        let cancelled = gate.authorize(AuthPurpose::Decrypt, &handle).await;
        assert!(matches!(
            cancelled,
            Err(VaultError::NotAuthenticated(AuthFailure::Cancelled))
        ));

        let dropped = gate.authorize(AuthPurpose::Decrypt, &handle).await;
        assert!(matches!(
            dropped,
            Err(VaultError::NotAuthenticated(AuthFailure::Cancelled))
        ));
    }

    #[tokio::test]
    async fn test_second_ceremony_rejected_while_first_pending() {
        let (gate, mut requests) = AuthGate::new();
        let gate = std::sync::Arc::new(gate);

        let first = {
            let gate = std::sync::Arc::clone(&gate);
            tokio::spawn(async move { gate.authorize(AuthPurpose::Decrypt, &test_handle(1)).await })
        };
        let request = requests.recv().await.expect("first request");

        let second = gate.authorize(AuthPurpose::Decrypt, &test_handle(1)).await;
        assert!(matches!(second, Err(VaultError::AuthAlreadyPending)));

        request.respond(AuthDecision::Granted);
        assert!(first.await.expect("join").is_ok());

        // The slot is free again once the first ceremony resolved.
        tokio::spawn(async move {
            requests.recv().await.expect("retry").respond(AuthDecision::Granted);
        });
        assert!(gate.authorize(AuthPurpose::Decrypt, &test_handle(1)).await.is_ok());
    }

    #[tokio::test]
    async fn test_gate_without_ui_fails_closed() {
        let (gate, requests) = AuthGate::new();
        drop(requests);

        let result = gate.authorize(AuthPurpose::Decrypt, &test_handle(1)).await;
        assert!(matches!(
            result,
            Err(VaultError::NotAuthenticated(AuthFailure::Error(_)))
        ));

        // The pending slot was released despite the failure.
        let again = gate.authorize(AuthPurpose::Decrypt, &test_handle(1)).await;
        assert!(matches!(again, Err(VaultError::NotAuthenticated(_))));
    }
}
