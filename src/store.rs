//! Storage collaborators.
//!
//! [`RowStore`] is the boundary to the record store. Implementations must
//! return rows in strictly ascending primary-key order, expose the most
//! recent row's chain value, and append fully formed rows only. Serializing
//! the read-then-append sequence is the [`Ledger`]'s job, not the store's.
//!
//! A stored row that no longer decodes is handed over as
//! [`FetchedRow::Malformed`] so the assembler can drop it like any other
//! untrustworthy row. Only genuine I/O failures fail a read.
//!
//! [`Ledger`]: crate::ledger::Ledger

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::chain::ChainValue;
use crate::error::VaultError;
use crate::ope::OrderedCiphertext;
use crate::record::{FetchedRow, RowId, SealedRow, StoredRow};

/// The record store as seen by the integrity pipeline.
pub trait RowStore: Send + Sync {
    /// Every row, ascending by primary key.
    fn scan_all(&self) -> Result<Vec<FetchedRow>, VaultError>;

    /// Rows whose weight ciphertext lies in `[min, max]`, ascending by
    /// primary key. Evaluated on ciphertext; nothing is decrypted.
    ///
    /// Malformed rows are always included: they cannot be shown not to
    /// match, and the caller must see them dropped.
    fn scan_weight_range(
        &self,
        min: OrderedCiphertext,
        max: OrderedCiphertext,
    ) -> Result<Vec<FetchedRow>, VaultError> {
        Ok(self
            .scan_all()?
            .into_iter()
            .filter(|r| match r {
                FetchedRow::Decoded(stored) => stored.row.weight >= min && stored.row.weight <= max,
                FetchedRow::Malformed { .. } => true,
            })
            .collect())
    }

    /// Chain value of the most recently appended row, `None` when empty.
    fn last_chain_value(&self) -> Result<Option<ChainValue>, VaultError>;

    /// Append one row and return its assigned primary key.
    fn append(&self, row: SealedRow) -> Result<RowId, VaultError>;

    /// Append a batch as one unit: either every row lands or none does.
    fn append_all(&self, rows: Vec<SealedRow>) -> Result<Vec<RowId>, VaultError>;
}

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

/// A process-local store. Useful for tests and as a reference implementation.
#[derive(Debug, Default)]
pub struct MemoryStore {
    rows: RwLock<Vec<StoredRow>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed the store with rows as they would come back from a database,
    /// e.g. an export or a deliberately tampered copy.
    pub fn from_rows(mut rows: Vec<StoredRow>) -> Self {
        rows.sort_by_key(|r| r.row_id);
        Self {
            rows: RwLock::new(rows),
        }
    }

    /// Copy of every stored row, ascending by primary key.
    pub fn snapshot(&self) -> Vec<StoredRow> {
        self.rows.read().clone()
    }

    pub fn len(&self) -> usize {
        self.rows.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.read().is_empty()
    }

    fn next_id(rows: &[StoredRow]) -> RowId {
        rows.last().map_or(1, |r| r.row_id + 1)
    }
}

impl RowStore for MemoryStore {
    fn scan_all(&self) -> Result<Vec<FetchedRow>, VaultError> {
        Ok(self.snapshot().into_iter().map(FetchedRow::from).collect())
    }

    fn last_chain_value(&self) -> Result<Option<ChainValue>, VaultError> {
        Ok(self.rows.read().last().map(|r| r.row.chain_value))
    }

    fn append(&self, row: SealedRow) -> Result<RowId, VaultError> {
        let mut rows = self.rows.write();
        let row_id = Self::next_id(&rows);
        rows.push(StoredRow { row_id, row });
        Ok(row_id)
    }

    fn append_all(&self, batch: Vec<SealedRow>) -> Result<Vec<RowId>, VaultError> {
        let mut rows = self.rows.write();
        let first = Self::next_id(&rows);
        let ids: Vec<RowId> = (first..first + batch.len() as RowId).collect();
        rows.extend(
            ids.iter()
                .zip(batch)
                .map(|(&row_id, row)| StoredRow { row_id, row }),
        );
        Ok(ids)
    }
}

// ---------------------------------------------------------------------------
// File-backed store
// ---------------------------------------------------------------------------

/// How far back to read per step when looking for the last line.
const TAIL_CHUNK: u64 = 4096;

/// One JSON object per line, binary columns hex-encoded.
///
/// A row is committed once its terminating newline is on disk. An
/// unterminated trailing fragment left by an interrupted append is ignored
/// by reads and cut off on open and before the next append. Appends and
/// chain-head lookups touch only the end of the file.
#[derive(Debug)]
pub struct JsonlStore {
    path: PathBuf,
    file_lock: Mutex<()>,
}

/// Enough of a row to extend the chain without decoding the rest of the
/// line.
#[derive(Deserialize)]
struct RowHead {
    chain_value: ChainValue,
}

#[derive(Deserialize)]
struct RowKey {
    row_id: RowId,
}

impl JsonlStore {
    /// Open (or create) a store at `path`, discarding any uncommitted tail.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, VaultError> {
        let path = path.as_ref().to_path_buf();
        let mut file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(&path)?;
        truncate_uncommitted(&mut file)?;
        Ok(Self {
            path,
            file_lock: Mutex::new(()),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_rows(&self) -> Result<Vec<FetchedRow>, VaultError> {
        let raw = fs::read(&self.path)?;
        let committed = raw.iter().rposition(|&b| b == b'\n').map_or(0, |i| i + 1);

        let mut rows = Vec::new();
        for line in raw[..committed].split(|&b| b == b'\n') {
            if is_blank(line) {
                continue;
            }
            let position = rows.len() as RowId + 1;
            rows.push(decode_line(line, position));
        }
        Ok(rows)
    }

    fn write_rows(&self, batch: Vec<SealedRow>) -> Result<Vec<RowId>, VaultError> {
        let _guard = self.file_lock.lock();
        let mut file = OpenOptions::new().read(true).write(true).open(&self.path)?;
        let committed = truncate_uncommitted(&mut file)?;
        let first = match last_line(&mut file)? {
            Some(line) => parse_tail::<RowKey>(&line)?.row_id + 1,
            None => 1,
        };

        let mut buf = String::new();
        let mut ids = Vec::with_capacity(batch.len());
        for (row_id, row) in (first..).zip(batch) {
            buf.push_str(&serde_json::to_string(&StoredRow { row_id, row })?);
            buf.push('\n');
            ids.push(row_id);
        }

        file.seek(SeekFrom::Start(committed))?;
        if let Err(err) = file.write_all(buf.as_bytes()).and_then(|_| file.sync_data()) {
            tracing::warn!(error = %err, "append failed; rolling back");
            file.set_len(committed)?;
            return Err(err.into());
        }
        Ok(ids)
    }
}

impl RowStore for JsonlStore {
    /// Rows in file order, which is ascending id order for an append-only
    /// file. A line that does not decode is reported as malformed.
    fn scan_all(&self) -> Result<Vec<FetchedRow>, VaultError> {
        let _guard = self.file_lock.lock();
        self.read_rows()
    }

    fn last_chain_value(&self) -> Result<Option<ChainValue>, VaultError> {
        let _guard = self.file_lock.lock();
        let mut file = File::open(&self.path)?;
        match last_line(&mut file)? {
            Some(line) => Ok(Some(parse_tail::<RowHead>(&line)?.chain_value)),
            None => Ok(None),
        }
    }

    fn append(&self, row: SealedRow) -> Result<RowId, VaultError> {
        let ids = self.write_rows(vec![row])?;
        ids.first()
            .copied()
            .ok_or_else(|| VaultError::Storage("append produced no row".into()))
    }

    fn append_all(&self, rows: Vec<SealedRow>) -> Result<Vec<RowId>, VaultError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        self.write_rows(rows)
    }
}

fn is_blank(line: &[u8]) -> bool {
    line.iter().all(u8::is_ascii_whitespace)
}

/// Decode one committed line. `position` identifies the row when even its
/// id is unreadable; in an untampered file the two coincide.
fn decode_line(line: &[u8], position: RowId) -> FetchedRow {
    match serde_json::from_slice::<StoredRow>(line) {
        Ok(stored) => FetchedRow::Decoded(stored),
        Err(err) => {
            let row_id = serde_json::from_slice::<RowKey>(line).map_or(position, |k| k.row_id);
            tracing::warn!(row_id, error = %err, "stored row does not decode");
            FetchedRow::Malformed { row_id }
        }
    }
}

/// The chain cannot be extended from a head it cannot read.
fn parse_tail<T: DeserializeOwned>(line: &[u8]) -> Result<T, VaultError> {
    serde_json::from_slice(line)
        .map_err(|e| VaultError::Storage(format!("most recent row does not decode: {e}")))
}

/// Offset of the last `\n` strictly before `end`.
fn rfind_newline(file: &mut File, end: u64) -> io::Result<Option<u64>> {
    let mut buf = vec![0u8; TAIL_CHUNK as usize];
    let mut hi = end;
    while hi > 0 {
        let lo = hi.saturating_sub(TAIL_CHUNK);
        let chunk = &mut buf[..(hi - lo) as usize];
        file.seek(SeekFrom::Start(lo))?;
        file.read_exact(chunk)?;
        if let Some(i) = chunk.iter().rposition(|&b| b == b'\n') {
            return Ok(Some(lo + i as u64));
        }
        hi = lo;
    }
    Ok(None)
}

/// Cut an unterminated trailing fragment. Returns the committed length.
fn truncate_uncommitted(file: &mut File) -> io::Result<u64> {
    let len = file.metadata()?.len();
    let committed = rfind_newline(file, len)?.map_or(0, |i| i + 1);
    if committed < len {
        tracing::warn!(discarded = len - committed, "discarding uncommitted tail");
        file.set_len(committed)?;
        file.sync_data()?;
    }
    Ok(committed)
}

/// The last committed, non-blank line, read backwards from the end.
fn last_line(file: &mut File) -> io::Result<Option<Vec<u8>>> {
    let len = file.metadata()?.len();
    let mut end = rfind_newline(file, len)?;
    while let Some(newline) = end {
        let start = rfind_newline(file, newline)?.map_or(0, |i| i + 1);
        let mut line = vec![0u8; (newline - start) as usize];
        file.seek(SeekFrom::Start(start))?;
        file.read_exact(&mut line)?;
        if !is_blank(&line) {
            return Ok(Some(line));
        }
        end = start.checked_sub(1);
    }
    Ok(None)
}
