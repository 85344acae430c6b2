//! Minimal example: a patient ledger with a clinician and a researcher.
//!
//! Run with: `cargo run --example clinical_ledger_demo`
//!
//! - Clinical staff insert records; each row is encrypted, authenticated and
//!   chained to its predecessor.
//! - A researcher scans the same table and never sees identity fields.
//! - A weight range is answered by comparing order-preserving ciphertexts.
//! - Integrity events are persisted to a file for inspection.

use chainvault::audit::FileIntegritySink;
use chainvault::store::JsonlStore;
use chainvault::{generate_key_ring, Caller, Ledger, PatientRecord, Role};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // 1. Setup
    let keys = generate_key_ring()?;
    let dir = std::env::temp_dir();
    let table = dir.join("chainvault_patients.jsonl");
    let _ = std::fs::remove_file(&table);

    let ledger = Ledger::new(&keys, JsonlStore::open(&table)?)?;
    let events = dir.join("chainvault_integrity.jsonl");
    ledger.add_integrity_sink(Box::new(FileIntegritySink::new(&events)?));

    let doctor = Caller::new("dr-adeyemi", Role::Clinical);
    let researcher = Caller::new("r-lindqvist", Role::Researcher);

    // 2. Insert
    let records = [
        ("Ines", "Moreau", false, 29, 58.3, "migraine"),
        ("Tomas", "Novak", true, 61, 92.75, "hypertension"),
        ("Keiko", "Sato", false, 45, 67.0, "none"),
    ];
    for (first, last, gender, age, weight, history) in records {
        let id = ledger.insert(
            &doctor,
            &PatientRecord {
                first_name: first.into(),
                last_name: last.into(),
                gender,
                age,
                weight,
                height: None,
                health_history: history.into(),
            },
        )?;
        println!("Inserted row {id}");
    }

    // 3. Verified scans
    let full = ledger.scan(&doctor)?;
    println!("Clinician view:  {}", serde_json::to_string_pretty(&full.rows)?);
    let redacted = ledger.scan(&researcher)?;
    println!("Researcher view: {}", serde_json::to_string_pretty(&redacted.rows)?);

    // 4. Range query on ciphertext
    let range = ledger.query_weight_range(&researcher, 60.0, 95.0)?;
    println!("Weights in [60, 95]: {:?}", range.rows.iter().map(|r| r.weight).collect::<Vec<_>>());

    println!("Table written to:            {}", table.display());
    println!("Integrity events written to: {}", events.display());
    Ok(())
}
