//! Hash chain over row authentication codes.
//!
//! ```text
//! chain[0] = SHA-256(auth_code[0] || GENESIS)
//! chain[i] = SHA-256(auth_code[i] || chain[i - 1])
//! ```
//!
//! [`ChainVerifier`] is the scan-side state machine. Its state is the last
//! chain value it accepted, starting from [`GENESIS`]. A row that fails
//! per-row checks is simply never offered to the verifier, so the state does
//! not advance past it; the successor's stored chain value was linked to the
//! dropped row's real chain value and therefore fails to verify. That is how
//! a dropped row surfaces as a completeness violation one row later.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::{self, DIGEST_LEN};
use crate::mac::RowAuthCode;

/// A chain value (32 bytes).
#[derive(Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChainValue(#[serde(with = "hex::serde")] pub [u8; DIGEST_LEN]);

/// The public "previous chain value" of the first row ever inserted.
pub const GENESIS: ChainValue = ChainValue([0u8; DIGEST_LEN]);

impl ChainValue {
    /// Constant-time comparison.
    pub fn ct_eq(&self, other: &ChainValue) -> bool {
        crypto::ct_eq(&self.0, &other.0)
    }
}

impl fmt::Debug for ChainValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChainValue({})", hex::encode(self.0))
    }
}

impl AsRef<[u8]> for ChainValue {
    fn as_ref(&self) -> &[u8] {
        &self.0
    }
}

/// Link a row's authentication code to its predecessor's chain value.
pub fn link(auth_code: &RowAuthCode, previous: &ChainValue) -> ChainValue {
    ChainValue(crypto::sha256(&[auth_code.as_ref(), previous.as_ref()]))
}

/// The chain did not verify at the offered row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChainBreak;

/// Reconstructs the chain while scanning rows in ascending primary-key order.
#[derive(Debug, Clone)]
pub struct ChainVerifier {
    state: ChainValue,
    accepted: usize,
}

impl Default for ChainVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ChainVerifier {
    pub fn new() -> Self {
        Self {
            state: GENESIS,
            accepted: 0,
        }
    }

    /// Offer a row whose authentication code has already been recomputed and
    /// verified. On success the state moves to `stored`; on failure it is
    /// left untouched and the scan must be aborted.
    pub fn advance(
        &mut self,
        recomputed: &RowAuthCode,
        stored: &ChainValue,
    ) -> Result<(), ChainBreak> {
        let expected = link(recomputed, &self.state);
        if !expected.ct_eq(stored) {
            return Err(ChainBreak);
        }
        self.state = *stored;
        self.accepted += 1;
        Ok(())
    }

    /// The last accepted chain value.
    pub fn state(&self) -> &ChainValue {
        &self.state
    }

    /// Number of rows accepted so far.
    pub fn accepted(&self) -> usize {
        self.accepted
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn code(byte: u8) -> RowAuthCode {
        RowAuthCode([byte; DIGEST_LEN])
    }

    fn build(codes: &[RowAuthCode]) -> Vec<ChainValue> {
        let mut prev = GENESIS;
        codes
            .iter()
            .map(|c| {
                prev = link(c, &prev);
                prev
            })
            .collect()
    }

    #[test]
    fn test_genesis_link() {
        let c = code(5);
        let mut manual = Vec::new();
        manual.extend_from_slice(&c.0);
        manual.extend_from_slice(&[0u8; DIGEST_LEN]);
        assert_eq!(link(&c, &GENESIS).0, crypto::sha256(&[manual.as_slice()]));
    }

    #[test]
    fn test_verifier_accepts_valid_chain() {
        let codes = [code(1), code(2), code(3)];
        let chain = build(&codes);
        let mut verifier = ChainVerifier::new();
        for (c, v) in codes.iter().zip(&chain) {
            verifier.advance(c, v).unwrap();
        }
        assert_eq!(verifier.accepted(), 3);
        assert_eq!(verifier.state(), &chain[2]);
    }

    #[test]
    fn test_skipped_row_breaks_next() {
        let codes = [code(1), code(2), code(3)];
        let chain = build(&codes);
        let mut verifier = ChainVerifier::new();
        verifier.advance(&codes[0], &chain[0]).unwrap();
        assert_eq!(verifier.advance(&codes[2], &chain[2]), Err(ChainBreak));
        assert_eq!(verifier.state(), &chain[0]);
    }

    #[test]
    fn test_swapped_rows_break() {
        let codes = [code(1), code(2)];
        let chain = build(&codes);
        let mut verifier = ChainVerifier::new();
        assert_eq!(verifier.advance(&codes[1], &chain[1]), Err(ChainBreak));
    }
}
