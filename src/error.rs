//! Error types for chainvault.
//!
//! Two tiers of failure exist. [`VaultError`] is returned from public
//! operations and always reaches the caller. [`RowFault`] describes why a
//! single stored row could not be trusted; the assembler absorbs it (the row
//! is dropped) and it never aborts a scan on its own.
//!
//! Messages say *what* failed without revealing key material or plaintext.

use serde::{Deserialize, Serialize};

use crate::protocol::FieldId;

/// The error type for all chainvault operations.
#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    /// A required key was missing or malformed at startup. Fatal: the
    /// process must not begin serving requests.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// Key bytes were rejected by the underlying primitive.
    #[error("invalid key")]
    InvalidKey,

    /// Sealing a confidential field failed.
    #[error("encryption failed")]
    EncryptionFailure,

    /// The system's random number generator failed to produce bytes.
    #[error("randomness source failed")]
    RandomnessFailure,

    /// The record cannot be represented under the row protocol.
    #[error("invalid record: {0}")]
    InvalidRecord(String),

    /// The caller's role does not permit the operation.
    #[error("access denied: {0}")]
    AccessDenied(String),

    /// The hash chain did not verify at `row_id`. Rows are missing,
    /// reordered or substituted; no partial output is returned.
    #[error("completeness violation: chain broken at row {row_id}")]
    CompletenessViolation { row_id: u64 },

    /// The storage collaborator failed.
    #[error("storage error: {0}")]
    Storage(String),
}

impl From<std::io::Error> for VaultError {
    fn from(err: std::io::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

impl From<serde_json::Error> for VaultError {
    fn from(err: serde_json::Error) -> Self {
        Self::Storage(err.to_string())
    }
}

/// Why a single stored row was rejected during a scan.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, thiserror::Error)]
#[serde(rename_all = "snake_case", tag = "fault")]
pub enum RowFault {
    /// The AEAD tag of a confidential field did not verify, or the opened
    /// plaintext was not of the expected type.
    #[error("decryption failed for field {field}")]
    Decryption { field: FieldId },

    /// The order-preserving ciphertext is not in the image of the codec.
    #[error("order-preserving decode failed")]
    Codec,

    /// The recomputed row authentication code does not match the stored one.
    #[error("row authentication failed")]
    Authentication,

    /// The stored row no longer decodes into its column layout.
    #[error("stored row is malformed")]
    Malformed,
}
