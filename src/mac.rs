//! Row Authenticator.
//!
//! A pure function over a row's canonical plaintext tuple: the seven fields
//! of [`ROW_FIELD_ORDER`] rendered canonically and joined with
//! [`DELIMITER`], then signed with HMAC-SHA-256 under the authentication
//! key. The signed message is
//!
//! ```text
//! PROTOCOL_VERSION (u32, big-endian) || canonical string
//! ```
//!
//! so a code never verifies under a different field order. Verification
//! recomputes and compares in constant time.
//!
//! Nothing here knows about chaining or storage.

use serde::{Deserialize, Serialize};

use crate::crypto::{MacKey, DIGEST_LEN};
use crate::error::VaultError;
use crate::field::ScalarValue;
use crate::keys::KeyRing;
use crate::protocol::{self, FieldId, DELIMITER, FIELD_COUNT, PROTOCOL_VERSION, ROW_FIELD_ORDER};
use crate::record::PatientRecord;

/// A row authentication code (32 bytes).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RowAuthCode(#[serde(with = "hex::serde")] pub [u8; DIGEST_LEN]);

impl AsRef<[u8]> for RowAuthCode {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// The canonical plaintext tuple of one row, in protocol order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RowTuple {
    fields: [String; FIELD_COUNT],
}

impl RowTuple {
    /// Render `record` canonically.
    ///
    /// Fails with `InvalidRecord` if a text field contains the delimiter or
    /// a two-decimal field is outside the scaled domain.
    pub fn from_record(record: &PatientRecord) -> Result<Self, VaultError> {
        let fields = ROW_FIELD_ORDER.map(|id| match id {
            FieldId::FirstName => Ok(record.first_name.clone()),
            FieldId::LastName => Ok(record.last_name.clone()),
            FieldId::Gender => Ok(ScalarValue::Bool(record.gender).to_string()),
            FieldId::Age => Ok(ScalarValue::Int(record.age.into()).to_string()),
            FieldId::Weight => canonical_decimal(id, record.weight),
            FieldId::Height => match record.height {
                Some(h) => canonical_decimal(id, h),
                None => Ok(String::new()),
            },
            FieldId::HealthHistory => Ok(record.health_history.clone()),
        });

        let mut out: [String; FIELD_COUNT] = Default::default();
        for ((slot, id), value) in out.iter_mut().zip(ROW_FIELD_ORDER).zip(fields) {
            let value = value?;
            if value.contains(DELIMITER) {
                return Err(VaultError::InvalidRecord(format!(
                    "{id} contains the reserved delimiter {DELIMITER:?}"
                )));
            }
            *slot = value;
        }
        Ok(Self { fields: out })
    }

    /// The exact bytes the authentication code covers.
    pub fn serialize(&self) -> String {
        self.fields.join(DELIMITER.to_string().as_str())
    }
}

fn canonical_decimal(id: FieldId, value: f64) -> Result<String, VaultError> {
    protocol::scale(value)
        .map(protocol::render_scaled)
        .ok_or_else(|| VaultError::InvalidRecord(format!("{id} value {value} is out of range")))
}

/// Computes and verifies row authentication codes.
pub struct RowAuthenticator {
    key: MacKey,
}

impl RowAuthenticator {
    pub fn new(keys: &KeyRing) -> Self {
        Self {
            key: MacKey::new(keys.authentication()),
        }
    }

    pub fn compute(&self, tuple: &RowTuple) -> RowAuthCode {
        let version = PROTOCOL_VERSION.to_be_bytes();
        RowAuthCode(self.key.sign(&[&version[..], tuple.serialize().as_bytes()]))
    }

    pub fn verify(&self, tuple: &RowTuple, code: &RowAuthCode) -> bool {
        self.verify_serialized(tuple.serialize().as_bytes(), code)
    }

    /// Verify against an already serialized tuple. Timing-safe.
    pub fn verify_serialized(&self, serialized: &[u8], code: &RowAuthCode) -> bool {
        let version = PROTOCOL_VERSION.to_be_bytes();
        self.key.verify(&[&version[..], serialized], &code.0)
    }
}
