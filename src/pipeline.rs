//! Per-row sealing and opening.
//!
//! Write side:
//!
//! ```text
//! PatientRecord -> RowTuple (validates, canonicalises)
//!               -> Field Cipher (gender, age) + Order-Preserving Codec (weight)
//!               -> Row Authenticator over the plaintext tuple
//!               = PreparedRow --link(previous chain value)--> SealedRow
//! ```
//!
//! The expensive work happens in [`Pipeline::prepare`], outside the write
//! gate; only [`PreparedRow::link`] needs the predecessor's chain value.
//!
//! Read side: [`Pipeline::open`] decrypts first, then re-authenticates, and
//! returns a [`RowFault`] value for any row that cannot be trusted.

use crate::chain::{self, ChainValue};
use crate::error::{RowFault, VaultError};
use crate::field::{FieldCipher, ScalarKind, ScalarValue, SealedField};
use crate::keys::KeyRing;
use crate::mac::{RowAuthCode, RowAuthenticator, RowTuple};
use crate::ope::{OrderPreservingCodec, OrderedCiphertext};
use crate::protocol::{self, FieldId};
use crate::record::{PatientRecord, SealedRow, StoredRow};

/// The three keyed components, built once from the key ring.
pub struct Pipeline {
    cipher: FieldCipher,
    codec: OrderPreservingCodec,
    authenticator: RowAuthenticator,
}

/// A row with every column computed except its chain value.
#[derive(Debug, Clone)]
pub struct PreparedRow {
    first_name: String,
    last_name: String,
    gender: SealedField,
    age: SealedField,
    weight: OrderedCiphertext,
    height: Option<f64>,
    health_history: String,
    row_auth_code: RowAuthCode,
}

impl PreparedRow {
    pub fn row_auth_code(&self) -> &RowAuthCode {
        &self.row_auth_code
    }

    /// Attach the chain value derived from `previous`.
    pub fn link(self, previous: &ChainValue) -> SealedRow {
        let chain_value = chain::link(&self.row_auth_code, previous);
        SealedRow {
            first_name: self.first_name,
            last_name: self.last_name,
            gender: self.gender,
            age: self.age,
            weight: self.weight,
            height: self.height,
            health_history: self.health_history,
            row_auth_code: self.row_auth_code,
            chain_value,
        }
    }
}

/// A stored row that decrypted and re-authenticated cleanly.
#[derive(Debug, Clone)]
pub struct OpenedRow {
    pub record: PatientRecord,
    /// Equal to the recomputed code; safe to feed to the chain verifier.
    pub row_auth_code: RowAuthCode,
}

impl Pipeline {
    pub fn new(keys: &KeyRing) -> Result<Self, VaultError> {
        Ok(Self {
            cipher: FieldCipher::new(keys)?,
            codec: OrderPreservingCodec::new(keys),
            authenticator: RowAuthenticator::new(keys),
        })
    }

    pub fn codec(&self) -> &OrderPreservingCodec {
        &self.codec
    }

    /// Validate, encrypt and authenticate a plaintext record.
    pub fn prepare(&self, record: &PatientRecord) -> Result<PreparedRow, VaultError> {
        let tuple = RowTuple::from_record(record)?;

        let gender = self.cipher.encrypt(&ScalarValue::Bool(record.gender))?;
        let age = self.cipher.encrypt(&ScalarValue::Int(record.age.into()))?;
        let weight = self.codec.encode(record.weight)?;
        let height = record.height.and_then(protocol::scale).map(protocol::unscale);

        Ok(PreparedRow {
            first_name: record.first_name.clone(),
            last_name: record.last_name.clone(),
            gender,
            age,
            weight,
            height,
            health_history: record.health_history.clone(),
            row_auth_code: self.authenticator.compute(&tuple),
        })
    }

    /// Decrypt and re-authenticate one stored row.
    pub fn open(&self, stored: &StoredRow) -> Result<OpenedRow, RowFault> {
        let row = &stored.row;

        let gender = match self.cipher.decrypt(&row.gender, ScalarKind::Bool) {
            Some(ScalarValue::Bool(b)) => b,
            _ => {
                return Err(RowFault::Decryption {
                    field: FieldId::Gender,
                })
            }
        };
        let age = match self.cipher.decrypt(&row.age, ScalarKind::Int) {
            Some(ScalarValue::Int(n)) => u32::try_from(n).map_err(|_| RowFault::Decryption {
                field: FieldId::Age,
            })?,
            _ => return Err(RowFault::Decryption { field: FieldId::Age }),
        };
        let weight = self
            .codec
            .decode_scaled(row.weight)
            .map(protocol::unscale)
            .ok_or(RowFault::Codec)?;

        let record = PatientRecord {
            first_name: row.first_name.clone(),
            last_name: row.last_name.clone(),
            gender,
            age,
            weight,
            height: row.height.and_then(protocol::scale).map(protocol::unscale),
            health_history: row.health_history.clone(),
        };

        // A stored height that no longer scales (NaN, out of range) makes the
        // tuple unrepresentable; that is tampering of an authenticated field.
        if row.height.is_some() && record.height.is_none() {
            return Err(RowFault::Authentication);
        }
        let tuple = RowTuple::from_record(&record).map_err(|_| RowFault::Authentication)?;
        if !self.authenticator.verify(&tuple, &row.row_auth_code) {
            return Err(RowFault::Authentication);
        }

        Ok(OpenedRow {
            record,
            row_auth_code: row.row_auth_code,
        })
    }
}
