//! Order-Preserving Codec for the range field.
//!
//! The plaintext float is scaled by 100 and rounded half-up into a signed
//! 32-bit integer, then mapped through a keyed, strictly increasing function
//! into a 48-bit ciphertext space. For `a < b` (after scaling) the codec
//! guarantees `encode(a) < encode(b)`, so the storage engine can evaluate
//! range predicates on ciphertext directly.
//!
//! This leaks the relative order of the underlying values. That leakage is
//! the accepted price of server-side range filtering; the scheme must not be
//! swapped for a non-order-preserving one without migrating every stored
//! ciphertext.
//!
//! ## Construction
//!
//! The function is lazily sampled over a binary search tree of the domain:
//!
//! ```text
//! node   = (domain [dlo, dhi], range [rlo, rhi]),  dhi - dlo <= rhi - rlo
//! pivot  x = dlo + (dhi - dlo) / 2
//! image  y = PRF(key, node) mod the sub-range that leaves room for
//!            x - dlo points below and dhi - x points above
//! left   = ([dlo, x - 1], [rlo, y - 1])
//! right  = ([x + 1, dhi], [y + 1, rhi])
//! ```
//!
//! Encoding walks from the root to the node whose pivot is the plaintext.
//! Decoding walks the same tree by comparing against each pivot's image and
//! fails if it runs out of tree without an exact hit.

use serde::{Deserialize, Serialize};

use crate::crypto::MacKey;
use crate::error::VaultError;
use crate::keys::KeyRing;
use crate::protocol;

/// Bits of ciphertext space.
pub const RANGE_BITS: u32 = 48;

const DOMAIN_MAX: u64 = u32::MAX as u64;
const RANGE_MAX: u64 = (1u64 << RANGE_BITS) - 1;

/// An order-preserving ciphertext. Ordering on this type matches ordering
/// on the scaled plaintext.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct OrderedCiphertext(pub u64);

/// One node of the lazily sampled search tree.
#[derive(Clone, Copy)]
struct Node {
    dlo: u64,
    dhi: u64,
    rlo: u64,
    rhi: u64,
}

impl Node {
    fn root() -> Self {
        Self {
            dlo: 0,
            dhi: DOMAIN_MAX,
            rlo: 0,
            rhi: RANGE_MAX,
        }
    }

    fn left(self, x: u64, y: u64) -> Self {
        Self {
            dhi: x - 1,
            rhi: y - 1,
            ..self
        }
    }

    fn right(self, x: u64, y: u64) -> Self {
        Self {
            dlo: x + 1,
            rlo: y + 1,
            ..self
        }
    }
}

/// Deterministic scale-then-encrypt codec under the OPE key.
pub struct OrderPreservingCodec {
    prf: MacKey,
}

impl OrderPreservingCodec {
    pub fn new(keys: &KeyRing) -> Self {
        Self {
            prf: MacKey::new(keys.order_preserving()),
        }
    }

    /// Scale, round and encode a float.
    pub fn encode(&self, value: f64) -> Result<OrderedCiphertext, VaultError> {
        let scaled = protocol::scale(value).ok_or_else(|| {
            VaultError::InvalidRecord(format!("{value} is outside the order-preserving domain"))
        })?;
        Ok(self.encode_scaled(scaled))
    }

    /// Encode a query bound. Bounds beyond the domain are clamped to its
    /// edges, so every stored ciphertext stays comparable against them.
    pub fn encode_bound(&self, value: f64) -> Result<OrderedCiphertext, VaultError> {
        let scaled = protocol::scale_saturating(value)
            .ok_or_else(|| VaultError::InvalidRecord("range bound is NaN".into()))?;
        Ok(self.encode_scaled(scaled))
    }

    /// Decode back to the two-decimal float. `None` if the ciphertext was not
    /// produced by this codec and key.
    pub fn decode(&self, ciphertext: OrderedCiphertext) -> Option<f64> {
        self.decode_scaled(ciphertext).map(protocol::unscale)
    }

    /// Encode an already-scaled integer.
    pub fn encode_scaled(&self, scaled: i32) -> OrderedCiphertext {
        let m = to_domain(scaled);
        let mut node = Node::root();
        loop {
            let (x, y) = self.pivot(node);
            if m == x {
                return OrderedCiphertext(y);
            }
            node = if m < x { node.left(x, y) } else { node.right(x, y) };
        }
    }

    /// Decode to the exact scaled integer.
    pub fn decode_scaled(&self, ciphertext: OrderedCiphertext) -> Option<i32> {
        let c = ciphertext.0;
        if c > RANGE_MAX {
            return None;
        }
        let mut node = Node::root();
        loop {
            let (x, y) = self.pivot(node);
            if c == y {
                return Some(from_domain(x));
            }
            if c < y {
                if x == node.dlo {
                    return None;
                }
                node = node.left(x, y);
            } else {
                if x == node.dhi {
                    return None;
                }
                node = node.right(x, y);
            }
        }
    }

    /// The pivot of `node` and its sampled image.
    fn pivot(&self, node: Node) -> (u64, u64) {
        let x = node.dlo + (node.dhi - node.dlo) / 2;
        let lo = node.rlo + (x - node.dlo);
        let hi = node.rhi - (node.dhi - x);

        let coins = self.prf.sign(&[
            &node.dlo.to_be_bytes()[..],
            &node.dhi.to_be_bytes()[..],
            &node.rlo.to_be_bytes()[..],
            &node.rhi.to_be_bytes()[..],
        ]);
        let mut head = [0u8; 16];
        head.copy_from_slice(&coins[..16]);
        let span = (hi - lo) as u128 + 1;
        let y = lo + (u128::from_be_bytes(head) % span) as u64;
        (x, y)
    }
}

fn to_domain(scaled: i32) -> u64 {
    (scaled as i64 - i32::MIN as i64) as u64
}

fn from_domain(d: u64) -> i32 {
    (d as i64 + i32::MIN as i64) as i32
}
