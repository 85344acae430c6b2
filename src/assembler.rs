//! Record Assembler.
//!
//! Turns stored rows into a verified, redacted result set:
//!
//! 1. Decrypt and re-authenticate each row ([`Pipeline::open`]). A row the
//!    store could not decode fails here too.
//! 2. A row that fails is dropped; the chain state is not advanced.
//! 3. A row that passes is offered to the [`ChainVerifier`]. A mismatch
//!    aborts the whole scan and discards everything accumulated so far.
//! 4. Surviving rows are projected for the caller's role.
//!
//! A dropped final row has no successor to expose it. That gap is kept, but
//! the dropped list in [`VerifiedScan`] makes it visible to the caller.

use serde::Serialize;

use crate::chain::ChainVerifier;
use crate::error::{RowFault, VaultError};
use crate::pipeline::Pipeline;
use crate::record::{FetchedRow, Role, RowId, VerifiedRecord};

/// A row left out of a result set.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DroppedRow {
    pub row_id: RowId,
    pub fault: RowFault,
}

/// A result set that passed every check it was subjected to.
#[derive(Debug, Clone, Serialize)]
pub struct VerifiedScan {
    /// Projected rows in ascending primary-key order.
    pub rows: Vec<VerifiedRecord>,
    /// Rows dropped for per-row faults, ascending.
    pub dropped: Vec<DroppedRow>,
    /// Whether the hash chain was verified over the full table. Range
    /// queries see a filtered subset and cannot verify it.
    pub chain_verified: bool,
}

impl VerifiedScan {
    /// True when a dropped row sits after the last returned row, i.e. at a
    /// position no successor could have vouched for.
    pub fn tail_unverified(&self) -> bool {
        match (self.dropped.last(), self.rows.last()) {
            (Some(d), Some(r)) => d.row_id > r.row_id,
            (Some(_), None) => true,
            (None, _) => false,
        }
    }
}

/// A scan aborted on a chain break. Carries the drops seen before the break
/// so they can still be audited; never carries row data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScanAborted {
    pub row_id: RowId,
    pub dropped: Vec<DroppedRow>,
}

impl From<ScanAborted> for VaultError {
    fn from(aborted: ScanAborted) -> Self {
        VaultError::CompletenessViolation {
            row_id: aborted.row_id,
        }
    }
}

/// Verify a full, ordered table scan.
pub fn assemble<I>(pipeline: &Pipeline, rows: I, role: Role) -> Result<VerifiedScan, ScanAborted>
where
    I: IntoIterator,
    I::Item: Into<FetchedRow>,
{
    let mut verifier = ChainVerifier::new();
    let mut out = Vec::new();
    let mut dropped = Vec::new();

    for fetched in rows {
        let stored = match Into::<FetchedRow>::into(fetched) {
            FetchedRow::Decoded(stored) => stored,
            FetchedRow::Malformed { row_id } => {
                drop_row(&mut dropped, row_id, RowFault::Malformed);
                continue;
            }
        };
        let opened = match pipeline.open(&stored) {
            Ok(opened) => opened,
            Err(fault) => {
                drop_row(&mut dropped, stored.row_id, fault);
                continue;
            }
        };

        if verifier
            .advance(&opened.row_auth_code, &stored.row.chain_value)
            .is_err()
        {
            tracing::error!(
                row_id = stored.row_id,
                accepted = verifier.accepted(),
                "chain broken; rows missing, reordered or substituted"
            );
            return Err(ScanAborted {
                row_id: stored.row_id,
                dropped,
            });
        }

        out.push(VerifiedRecord::project(stored.row_id, opened.record, role));
    }

    Ok(VerifiedScan {
        rows: out,
        dropped,
        chain_verified: true,
    })
}

/// Verify a filtered subset row by row. No chain check.
pub fn assemble_unchained<I>(pipeline: &Pipeline, rows: I, role: Role) -> VerifiedScan
where
    I: IntoIterator,
    I::Item: Into<FetchedRow>,
{
    let mut out = Vec::new();
    let mut dropped = Vec::new();

    for fetched in rows {
        match Into::<FetchedRow>::into(fetched) {
            FetchedRow::Decoded(stored) => match pipeline.open(&stored) {
                Ok(opened) => {
                    out.push(VerifiedRecord::project(stored.row_id, opened.record, role))
                }
                Err(fault) => drop_row(&mut dropped, stored.row_id, fault),
            },
            FetchedRow::Malformed { row_id } => {
                drop_row(&mut dropped, row_id, RowFault::Malformed)
            }
        }
    }

    VerifiedScan {
        rows: out,
        dropped,
        chain_verified: false,
    }
}

fn drop_row(dropped: &mut Vec<DroppedRow>, row_id: RowId, fault: RowFault) {
    tracing::warn!(row_id, %fault, "dropping row");
    dropped.push(DroppedRow { row_id, fault });
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chain::GENESIS;
    use crate::keys::KeyRing;
    use crate::record::{PatientRecord, StoredRow};

    fn pipeline() -> Pipeline {
        Pipeline::new(&KeyRing::from_bytes([1u8; 32], [2u8; 32], [3u8; 32])).unwrap()
    }

    fn patient(age: u32) -> PatientRecord {
        PatientRecord {
            first_name: format!("First{age}"),
            last_name: format!("Last{age}"),
            gender: age % 2 == 0,
            age,
            weight: 50.0 + age as f64,
            height: None,
            health_history: String::new(),
        }
    }

    fn chain(p: &Pipeline, ages: &[u32]) -> Vec<StoredRow> {
        let mut prev = GENESIS;
        ages.iter()
            .enumerate()
            .map(|(i, &age)| {
                let row = p.prepare(&patient(age)).unwrap().link(&prev);
                prev = row.chain_value;
                StoredRow {
                    row_id: i as RowId + 1,
                    row,
                }
            })
            .collect()
    }

    #[test]
    fn test_empty_scan() {
        let scan = assemble(&pipeline(), Vec::<StoredRow>::new(), Role::Clinical).unwrap();
        assert!(scan.rows.is_empty());
        assert!(!scan.tail_unverified());
    }

    #[test]
    fn test_tail_drop_is_reported_not_fatal() {
        let p = pipeline();
        let mut rows = chain(&p, &[30, 31, 32]);
        rows[2].row.age.ciphertext[0] ^= 1;

        let scan = assemble(&p, rows, Role::Clinical).unwrap();
        assert_eq!(scan.rows.len(), 2);
        assert_eq!(
            scan.dropped,
            vec![DroppedRow {
                row_id: 3,
                fault: RowFault::Decryption {
                    field: crate::protocol::FieldId::Age
                }
            }]
        );
        assert!(scan.tail_unverified());
    }

    #[test]
    fn test_abort_keeps_prior_drops_for_audit() {
        let p = pipeline();
        let mut rows = chain(&p, &[30, 31, 32]);
        rows[1].row.first_name = "Mallory".into();

        let aborted = assemble(&p, rows, Role::Clinical).unwrap_err();
        assert_eq!(aborted.row_id, 3);
        assert_eq!(aborted.dropped.len(), 1);
        assert_eq!(aborted.dropped[0].fault, RowFault::Authentication);
    }

    #[test]
    fn test_malformed_row_is_dropped_then_detected() {
        let p = pipeline();
        let mut rows: Vec<FetchedRow> = chain(&p, &[30, 31, 32])
            .into_iter()
            .map(FetchedRow::from)
            .collect();
        rows[1] = FetchedRow::Malformed { row_id: 2 };

        let aborted = assemble(&p, rows, Role::Clinical).unwrap_err();
        assert_eq!(aborted.row_id, 3);
        assert_eq!(
            aborted.dropped,
            vec![DroppedRow {
                row_id: 2,
                fault: RowFault::Malformed
            }]
        );
    }

    #[test]
    fn test_unchained_ignores_gaps() {
        let p = pipeline();
        let mut rows = chain(&p, &[30, 31, 32]);
        rows.remove(1);
        let scan = assemble_unchained(&p, rows, Role::Researcher);
        assert_eq!(scan.rows.len(), 2);
        assert!(!scan.chain_verified);
        assert!(scan.rows.iter().all(|r| r.first_name.is_none()));
    }
}
