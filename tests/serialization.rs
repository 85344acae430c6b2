//! Concurrent inserts must be linearized: two writers may never link to the
//! same predecessor.

use std::sync::{Arc, Barrier, Mutex};
use std::thread;
use std::time::Duration;

use chainvault::chain::{self, ChainValue, GENESIS};
use chainvault::record::{FetchedRow, RowId, SealedRow};
use chainvault::store::{MemoryStore, RowStore};
use chainvault::{Caller, KeyRing, Ledger, PatientRecord, Role, VaultError};

/// Wraps a `MemoryStore`, records every predecessor read, and stalls between
/// the read and the caller's append to widen any race window.
#[derive(Default)]
struct SlowStore {
    inner: MemoryStore,
    observed: Mutex<Vec<Option<ChainValue>>>,
}

impl RowStore for SlowStore {
    fn scan_all(&self) -> Result<Vec<FetchedRow>, VaultError> {
        self.inner.scan_all()
    }

    fn last_chain_value(&self) -> Result<Option<ChainValue>, VaultError> {
        let value = self.inner.last_chain_value()?;
        self.observed.lock().unwrap().push(value);
        thread::sleep(Duration::from_millis(50));
        Ok(value)
    }

    fn append(&self, row: SealedRow) -> Result<RowId, VaultError> {
        self.inner.append(row)
    }

    fn append_all(&self, rows: Vec<SealedRow>) -> Result<Vec<RowId>, VaultError> {
        self.inner.append_all(rows)
    }
}

fn keys() -> KeyRing {
    KeyRing::from_bytes([8u8; 32], [9u8; 32], [10u8; 32])
}

fn patient(name: &str) -> PatientRecord {
    PatientRecord {
        first_name: name.into(),
        last_name: "Concurrent".into(),
        gender: true,
        age: 50,
        weight: 70.0,
        height: Some(1.8),
        health_history: String::new(),
    }
}

#[test]
fn test_concurrent_inserts_are_serialized() {
    let ledger = Arc::new(Ledger::new(&keys(), SlowStore::default()).unwrap());
    let barrier = Arc::new(Barrier::new(2));

    let handles: Vec<_> = ["left", "right"]
        .into_iter()
        .map(|name| {
            let ledger = Arc::clone(&ledger);
            let barrier = Arc::clone(&barrier);
            thread::spawn(move || {
                let caller = Caller::new(name, Role::Clinical);
                barrier.wait();
                ledger.insert(&caller, &patient(name)).unwrap()
            })
        })
        .collect();
    let mut ids: Vec<RowId> = handles.into_iter().map(|h| h.join().unwrap()).collect();
    ids.sort();
    assert_eq!(ids, vec![1, 2]);

    // The second writer read the predecessor only after the first appended.
    let rows = ledger.store().inner.snapshot();
    let observed = ledger.store().observed.lock().unwrap().clone();
    assert_eq!(observed, vec![None, Some(rows[0].row.chain_value)]);
    assert_eq!(
        rows[1].row.chain_value,
        chain::link(&rows[1].row.row_auth_code, &rows[0].row.chain_value)
    );

    let scan = ledger.scan(&Caller::new("auditor", Role::Clinical)).unwrap();
    assert_eq!(scan.rows.len(), 2);
}

#[test]
fn test_many_writers_produce_one_linear_chain() {
    let ledger = Arc::new(Ledger::new(&keys(), MemoryStore::new()).unwrap());
    let handles: Vec<_> = (0..8)
        .map(|t| {
            let ledger = Arc::clone(&ledger);
            thread::spawn(move || {
                let caller = Caller::new(format!("writer-{t}"), Role::Clinical);
                for i in 0..5 {
                    ledger.insert(&caller, &patient(&format!("w{t}r{i}"))).unwrap();
                }
            })
        })
        .collect();
    for h in handles {
        h.join().unwrap();
    }

    let scan = ledger.scan(&Caller::new("auditor", Role::Clinical)).unwrap();
    assert_eq!(scan.rows.len(), 40);
    assert!(scan.dropped.is_empty());
}

#[test]
fn test_unserialized_append_forks_the_chain() {
    // What the write gate prevents: two rows linked to the same predecessor.
    let keys = keys();
    let ledger = Ledger::new(&keys, MemoryStore::new()).unwrap();
    let pipeline = ledger.pipeline();

    let a = pipeline.prepare(&patient("a")).unwrap().link(&GENESIS);
    let b = pipeline.prepare(&patient("b")).unwrap().link(&GENESIS);
    let store = MemoryStore::new();
    store.append(a).unwrap();
    store.append(b).unwrap();

    let forked = Ledger::new(&keys, store).unwrap();
    assert!(matches!(
        forked.scan(&Caller::new("auditor", Role::Clinical)),
        Err(VaultError::CompletenessViolation { row_id: 2 })
    ));
}
