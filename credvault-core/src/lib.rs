//! Presence-gated storage for a single API credential.
//!
//! `credvault-core` keeps one secret (an API key) encrypted at rest under a
//! hardware-backed AES-256-GCM key whose decryption use is conditioned on
//! proof of user presence (fingerprint/PIN). The crate owns the correctness
//! of IV handling, key invalidation, and partial-failure recovery; screens,
//! prompts, and network calls live in the surrounding application.
//!
//! # Architecture
//!
//! Components, leaves first:
//!
//! 1. [`KeyManager`] — lifecycle of the single hardware-backed key behind the
//!    [`KeystoreBackend`] platform seam.
//! 2. [`AuthGate`] — channel-based presence ceremony; a grant mints a
//!    single-use [`Capability`] for one decrypt.
//! 3. [`CipherSession`](cipher::CipherSession) — AEAD with a fresh IV per
//!    encryption and the recorded IV per decryption.
//! 4. [`SecretStore`] — both-or-neither persistence of
//!    `{ciphertext, iv, schema_version}` over an [`AtomicBlobStore`].
//! 5. [`Vault`] — the state machine tying it together: `store`, `reveal`,
//!    `reset`, plus the wipe-and-restart recovery for invalidated keys and
//!    corrupt records.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//!
//! use credvault_core::{
//!     AuthDecision, SoftwareKeystore, MemoryBlobStore, Vault, VaultConfig,
//! };
//! use secrecy::ExposeSecret;
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() -> Result<(), credvault_core::VaultError> {
//! let backend = Arc::new(SoftwareKeystore::new());
//! let (vault, mut ceremonies) =
//!     Vault::new(backend, MemoryBlobStore::new(), VaultConfig::default());
//!
//! // The application UI drains ceremony requests; here presence is granted
//! // unconditionally.
//! tokio::spawn(async move {
//!     while let Some(request) = ceremonies.recv().await {
//!         request.respond(AuthDecision::Granted);
//!     }
//! });
//!
//! vault.store("sk-abc123")?;
//! let secret = vault.reveal().await?;
//! assert_eq!(secret.expose_secret(), "sk-abc123");
//! # Ok(())
//! # }
//! ```

pub mod auth;
pub mod cipher;
pub mod config;
pub mod error;
pub mod keystore;
pub mod record;
pub mod store;
pub mod vault;

pub use auth::{AuthDecision, AuthFailure, AuthGate, AuthPurpose, AuthRequest, Capability};
pub use cipher::{CipherSession, IV_LEN, TAG_LEN};
pub use config::{AuthValidity, KeyPolicy, VaultConfig};
pub use error::{VaultError, VaultResult};
pub use keystore::{KeyHandle, KeyManager, KeystoreBackend, SoftwareKeystore};
pub use record::SecretRecord;
pub use store::{AtomicBlobStore, FileBlobStore, MemoryBlobStore, SecretStore};
pub use vault::{Vault, VaultStatus};
