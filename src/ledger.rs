//! The ledger: inserts, scans and range queries over one record store.
//!
//! Inserts are linearized by construction. The sequence
//!
//! ```text
//! read last chain value -> link -> append
//! ```
//!
//! runs under `write_gate`, so two writers can never both link to the same
//! predecessor and fork the chain. Sealing and authentication happen before
//! the gate is taken.
//!
//! Scans take no lock beyond what the store needs for its reads. Each scan
//! rebuilds chain state from storage; nothing is cached between operations.

use parking_lot::Mutex;

use crate::assembler::{self, VerifiedScan};
use crate::audit::{AuditTrail, IntegrityEvent, IntegrityEventKind, IntegritySink};
use crate::chain::GENESIS;
use crate::error::VaultError;
use crate::keys::KeyRing;
use crate::pipeline::Pipeline;
use crate::record::{Caller, PatientRecord, RowId};
use crate::store::RowStore;

/// Integrity-protected access to a [`RowStore`].
pub struct Ledger<S: RowStore> {
    pipeline: Pipeline,
    store: S,
    write_gate: Mutex<()>,
    audit: Mutex<AuditTrail>,
}

impl<S: RowStore> Ledger<S> {
    /// Build the keyed components once from `keys` and take ownership of the
    /// store. All writes to `store` must go through this ledger.
    pub fn new(keys: &KeyRing, store: S) -> Result<Self, VaultError> {
        Ok(Self {
            pipeline: Pipeline::new(keys)?,
            store,
            write_gate: Mutex::new(()),
            audit: Mutex::new(AuditTrail::new()),
        })
    }

    /// Keep at most `capacity` integrity events in memory. Sinks still
    /// receive every event.
    pub fn with_retained_events(mut self, capacity: usize) -> Self {
        self.audit.get_mut().set_capacity(capacity);
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    /// Forward every future integrity event to `sink`.
    pub fn add_integrity_sink(&self, sink: Box<dyn IntegritySink>) {
        self.audit.lock().add_forward_sink(sink);
    }

    /// Copy of the most recent integrity events, oldest first.
    pub fn integrity_events(&self) -> Vec<IntegrityEvent> {
        self.audit.lock().iter().cloned().collect()
    }

    /// Seal, authenticate, chain and append one record.
    pub fn insert(&self, caller: &Caller, record: &PatientRecord) -> Result<RowId, VaultError> {
        ensure_may_insert(caller)?;
        let prepared = self.pipeline.prepare(record)?;

        let _gate = self.write_gate.lock();
        let previous = self.store.last_chain_value()?.unwrap_or(GENESIS);
        let row_id = self.store.append(prepared.link(&previous))?;

        tracing::debug!(row_id, caller = %caller.id, "appended row");
        Ok(row_id)
    }

    /// Insert many records as one unit. Every record is validated and sealed
    /// before anything is appended; each row links to its predecessor within
    /// the batch.
    pub fn insert_batch(
        &self,
        caller: &Caller,
        records: &[PatientRecord],
    ) -> Result<Vec<RowId>, VaultError> {
        ensure_may_insert(caller)?;
        let prepared = records
            .iter()
            .map(|r| self.pipeline.prepare(r))
            .collect::<Result<Vec<_>, _>>()?;

        let _gate = self.write_gate.lock();
        let mut previous = self.store.last_chain_value()?.unwrap_or(GENESIS);
        let sealed = prepared
            .into_iter()
            .map(|p| {
                let row = p.link(&previous);
                previous = row.chain_value;
                row
            })
            .collect();
        let ids = self.store.append_all(sealed)?;

        tracing::debug!(count = ids.len(), caller = %caller.id, "appended batch");
        Ok(ids)
    }

    /// Scan the whole table in primary-key order and verify the chain.
    ///
    /// Returns `CompletenessViolation` and no rows if the chain breaks.
    pub fn scan(&self, caller: &Caller) -> Result<VerifiedScan, VaultError> {
        let rows = self.store.scan_all()?;
        match assembler::assemble(&self.pipeline, rows, caller.role) {
            Ok(scan) => {
                self.record_drops(caller, &scan.dropped);
                Ok(scan)
            }
            Err(aborted) => {
                self.record_drops(caller, &aborted.dropped);
                self.audit.lock().append(IntegrityEvent::new(
                    aborted.row_id,
                    IntegrityEventKind::CompletenessViolation,
                    &caller.id,
                ));
                Err(aborted.into())
            }
        }
    }

    /// Rows with `min <= weight <= max`, filtered by the store on
    /// order-preserving ciphertext. Each row is authenticated; the chain is
    /// not, since the subset is not contiguous.
    ///
    /// Bounds beyond the encodable domain are clamped, so a range such as
    /// `(f64::NEG_INFINITY, 80.0)` is accepted.
    pub fn query_weight_range(
        &self,
        caller: &Caller,
        min: f64,
        max: f64,
    ) -> Result<VerifiedScan, VaultError> {
        if min.is_nan() || max.is_nan() || min > max {
            return Err(VaultError::InvalidRecord(format!(
                "empty weight range [{min}, {max}]"
            )));
        }
        let codec = self.pipeline.codec();
        let rows = self
            .store
            .scan_weight_range(codec.encode_bound(min)?, codec.encode_bound(max)?)?;

        let scan = assembler::assemble_unchained(&self.pipeline, rows, caller.role);
        self.record_drops(caller, &scan.dropped);
        Ok(scan)
    }

    fn record_drops(&self, caller: &Caller, dropped: &[assembler::DroppedRow]) {
        if dropped.is_empty() {
            return;
        }
        let mut audit = self.audit.lock();
        for d in dropped {
            audit.append(IntegrityEvent::new(
                d.row_id,
                IntegrityEventKind::RowDropped { fault: d.fault },
                &caller.id,
            ));
        }
    }
}

fn ensure_may_insert(caller: &Caller) -> Result<(), VaultError> {
    if caller.role.may_insert() {
        return Ok(());
    }
    tracing::warn!(caller = %caller.id, role = ?caller.role, "insert denied");
    Err(VaultError::AccessDenied(format!(
        "role {:?} may not add records",
        caller.role
    )))
}
