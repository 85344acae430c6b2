//! # chainvault
//!
//! Confidentiality, per-row integrity and whole-scan completeness for an
//! append-only record store, with server-side range queries on one numeric
//! attribute.
//!
//! Each row is protected by four mechanisms:
//!
//! - **Field Cipher**: confidential scalars sealed with AES-256-GCM, each
//!   under its own random nonce.
//! - **Order-Preserving Codec**: the range field encoded so that ciphertext
//!   order matches plaintext order.
//! - **Row Authenticator**: HMAC-SHA-256 over the canonical plaintext tuple.
//! - **Hash chain**: every row's chain value commits to its predecessor's.
//!
//! The [`ledger::Ledger`] ties them together: serialized inserts, verified
//! scans that abort on any chain break, and role-based redaction.
//!
//! ## Public API
//!
//! Keys are loaded once ([`keys::KeyRing`]) and passed by reference into
//! [`ledger::Ledger::new`]. The cryptographic primitives themselves stay
//! `pub(crate)` inside `crypto`.

pub(crate) mod crypto;

pub mod assembler;
pub mod audit;
pub mod chain;
pub mod config;
pub mod error;
pub mod field;
pub mod keys;
pub mod ledger;
pub mod mac;
pub mod ope;
pub mod pipeline;
pub mod protocol;
pub mod record;
pub mod store;

pub use assembler::{DroppedRow, VerifiedScan};
pub use error::{RowFault, VaultError};
pub use keys::KeyRing;
pub use ledger::Ledger;
pub use record::{Caller, PatientRecord, Role, RowId, VerifiedRecord};

/// Generate a key ring of fresh random keys.
///
/// In production, key material should come from the provisioning
/// collaborator via [`config::VaultConfig`] and [`KeyRing::from_config`].
pub fn generate_key_ring() -> Result<KeyRing, VaultError> {
    KeyRing::generate()
}
