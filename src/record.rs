//! Record shapes at each stage of the pipeline.
//!
//! ```text
//! PatientRecord --seal--> SealedRow --append--> StoredRow --assemble--> VerifiedRecord
//!   plaintext              ciphertext columns    + row id                redacted projection
//! ```
//!
//! Roles and the redaction rule also live here, since they decide which
//! fields of a verified record survive into the projection.

use serde::{Deserialize, Serialize};

use crate::chain::ChainValue;
use crate::field::SealedField;
use crate::mac::RowAuthCode;
use crate::ope::OrderedCiphertext;
use crate::protocol::FieldId;

/// Primary key assigned by storage at insert. Strictly increasing.
pub type RowId = u64;

/// A patient record in plaintext, as supplied on insert and as recovered
/// on scan.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PatientRecord {
    pub first_name: String,
    pub last_name: String,
    pub gender: bool,
    pub age: u32,
    pub weight: f64,
    pub height: Option<f64>,
    pub health_history: String,
}

/// Every persisted column of a row except its primary key. Built as one
/// unit on insert and never mutated afterwards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SealedRow {
    pub first_name: String,
    pub last_name: String,
    pub gender: SealedField,
    pub age: SealedField,
    pub weight: OrderedCiphertext,
    pub height: Option<f64>,
    pub health_history: String,
    pub row_auth_code: RowAuthCode,
    pub chain_value: ChainValue,
}

/// A row as read back from storage.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRow {
    pub row_id: RowId,
    #[serde(flatten)]
    pub row: SealedRow,
}

/// A row as handed over by a store. A row that no longer decodes still
/// occupies its position in the chain, so it is passed on rather than
/// skipped.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchedRow {
    Decoded(StoredRow),
    Malformed { row_id: RowId },
}

impl FetchedRow {
    pub fn row_id(&self) -> RowId {
        match self {
            Self::Decoded(stored) => stored.row_id,
            Self::Malformed { row_id } => *row_id,
        }
    }
}

impl From<StoredRow> for FetchedRow {
    fn from(stored: StoredRow) -> Self {
        Self::Decoded(stored)
    }
}

/// The externally visible projection of a verified row. Nonces, the row
/// authentication code and the chain value never appear here. Redacted
/// fields are absent, not masked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VerifiedRecord {
    pub row_id: RowId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    pub gender: bool,
    pub age: u32,
    pub weight: f64,
    pub height: Option<f64>,
    pub health_history: String,
}

impl VerifiedRecord {
    /// Project a verified plaintext record for `role`.
    pub fn project(row_id: RowId, record: PatientRecord, role: Role) -> Self {
        let (first_name, last_name) = if role.may_view(FieldId::FirstName) {
            (Some(record.first_name), Some(record.last_name))
        } else {
            (None, None)
        };
        Self {
            row_id,
            first_name,
            last_name,
            gender: record.gender,
            age: record.age,
            weight: record.weight,
            height: record.height,
            health_history: record.health_history,
        }
    }
}

/// Group tag supplied by the authorization collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    /// Group H: doctors, nurses and administration. Full read, may insert.
    Clinical,
    /// Group R: researchers. Identity fields removed, read only.
    Researcher,
}

impl Role {
    /// Map an occupation string onto its group, as done at registration.
    pub fn from_occupation(occupation: &str) -> Option<Self> {
        match occupation.trim().to_lowercase().as_str() {
            "doctor" | "nurse" | "admin" | "hospital administration staff" => Some(Self::Clinical),
            "researcher" => Some(Self::Researcher),
            _ => None,
        }
    }

    pub fn may_view(&self, field: FieldId) -> bool {
        match self {
            Self::Clinical => true,
            Self::Researcher => !field.is_identity(),
        }
    }

    pub fn may_insert(&self) -> bool {
        matches!(self, Self::Clinical)
    }
}

/// An authenticated caller. The identity is opaque to this crate and is only
/// carried into logs and audit events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Caller {
    pub id: String,
    pub role: Role,
}

impl Caller {
    pub fn new(id: impl Into<String>, role: Role) -> Self {
        Self {
            id: id.into(),
            role,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> PatientRecord {
        PatientRecord {
            first_name: "Ada".into(),
            last_name: "Lovelace".into(),
            gender: false,
            age: 36,
            weight: 54.3,
            height: Some(1.65),
            health_history: "none".into(),
        }
    }

    #[test]
    fn test_researcher_projection_drops_identity() {
        let projected = VerifiedRecord::project(7, record(), Role::Researcher);
        assert_eq!(projected.first_name, None);
        assert_eq!(projected.last_name, None);

        let json = serde_json::to_value(&projected).unwrap();
        let obj = json.as_object().unwrap();
        assert!(!obj.contains_key("first_name"));
        assert!(!obj.contains_key("last_name"));
        assert_eq!(obj["age"], 36);
    }

    #[test]
    fn test_clinical_projection_keeps_identity() {
        let projected = VerifiedRecord::project(7, record(), Role::Clinical);
        assert_eq!(projected.first_name.as_deref(), Some("Ada"));
        assert_eq!(projected.last_name.as_deref(), Some("Lovelace"));
    }

    #[test]
    fn test_role_from_occupation() {
        assert_eq!(Role::from_occupation(" Nurse "), Some(Role::Clinical));
        assert_eq!(
            Role::from_occupation("Hospital Administration Staff"),
            Some(Role::Clinical)
        );
        assert_eq!(Role::from_occupation("researcher"), Some(Role::Researcher));
        assert_eq!(Role::from_occupation("janitor"), None);
    }

    #[test]
    fn test_only_clinical_may_insert() {
        assert!(Role::Clinical.may_insert());
        assert!(!Role::Researcher.may_insert());
    }
}
