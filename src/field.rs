//! Field Cipher: authenticated encryption of individual scalar values.
//!
//! A value is rendered to its canonical string form, sealed under
//! AES-256-GCM with a fresh 96-bit nonce and no associated data, and stored
//! as a [`SealedField`] (ciphertext and nonce together). Opening restores the
//! caller-specified [`ScalarKind`].
//!
//! Opening never errors through control flow: a tag failure or a plaintext
//! of the wrong type yields `None`, which the assembler treats as "this row
//! is compromised, drop it". There is no retry with another key.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::crypto::{AeadKey, NONCE_LEN};
use crate::error::VaultError;
use crate::keys::KeyRing;

/// A plaintext scalar accepted by the cipher.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScalarValue {
    Bool(bool),
    Int(i64),
    Text(String),
}

/// The type a sealed value is restored to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalarKind {
    Bool,
    Int,
    Text,
}

impl ScalarValue {
    pub fn kind(&self) -> ScalarKind {
        match self {
            Self::Bool(_) => ScalarKind::Bool,
            Self::Int(_) => ScalarKind::Int,
            Self::Text(_) => ScalarKind::Text,
        }
    }

    /// Parse a canonical string back into a value of `kind`.
    fn parse(kind: ScalarKind, raw: &str) -> Option<Self> {
        match kind {
            ScalarKind::Bool => match raw {
                "true" => Some(Self::Bool(true)),
                "false" => Some(Self::Bool(false)),
                _ => None,
            },
            ScalarKind::Int => raw.parse().ok().map(Self::Int),
            ScalarKind::Text => Some(Self::Text(raw.to_string())),
        }
    }
}

/// Canonical string form, shared with the row serialization.
impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(b) => write!(f, "{b}"),
            Self::Int(i) => write!(f, "{i}"),
            Self::Text(s) => f.write_str(s),
        }
    }
}

/// A confidential value at rest. The nonce is never persisted apart from
/// its ciphertext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SealedField {
    #[serde(with = "hex::serde")]
    pub ciphertext: Vec<u8>,
    #[serde(with = "hex::serde")]
    pub nonce: [u8; NONCE_LEN],
}

/// Seals and opens confidential fields under the confidentiality key.
pub struct FieldCipher {
    key: AeadKey,
}

impl FieldCipher {
    pub fn new(keys: &KeyRing) -> Result<Self, VaultError> {
        Ok(Self {
            key: AeadKey::new(keys.encryption())?,
        })
    }

    /// Encrypt one value under a fresh random nonce.
    pub fn encrypt(&self, value: &ScalarValue) -> Result<SealedField, VaultError> {
        let (ciphertext, nonce) = self.key.seal(value.to_string().as_bytes())?;
        Ok(SealedField { ciphertext, nonce })
    }

    /// Decrypt and restore a value of `expected`. `None` on tag failure or
    /// type mismatch.
    pub fn decrypt(&self, sealed: &SealedField, expected: ScalarKind) -> Option<ScalarValue> {
        let plaintext = self.key.open(&sealed.ciphertext, &sealed.nonce)?;
        let raw = String::from_utf8(plaintext).ok()?;
        ScalarValue::parse(expected, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use quickcheck::quickcheck;

    fn cipher() -> FieldCipher {
        FieldCipher::new(&KeyRing::from_bytes([1u8; 32], [2u8; 32], [3u8; 32])).unwrap()
    }

    #[test]
    fn test_roundtrip_each_kind() {
        let cipher = cipher();
        for value in [
            ScalarValue::Bool(true),
            ScalarValue::Bool(false),
            ScalarValue::Int(-17),
            ScalarValue::Int(0),
            ScalarValue::Text("asthma".into()),
        ] {
            let sealed = cipher.encrypt(&value).unwrap();
            assert_eq!(cipher.decrypt(&sealed, value.kind()), Some(value));
        }
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let cipher = cipher();
        let mut sealed = cipher.encrypt(&ScalarValue::Int(44)).unwrap();
        sealed.ciphertext[0] ^= 0x01;
        assert_eq!(cipher.decrypt(&sealed, ScalarKind::Int), None);
    }

    #[test]
    fn test_swapped_nonce_fails() {
        let cipher = cipher();
        let a = cipher.encrypt(&ScalarValue::Int(1)).unwrap();
        let b = cipher.encrypt(&ScalarValue::Int(1)).unwrap();
        let mixed = SealedField {
            ciphertext: a.ciphertext,
            nonce: b.nonce,
        };
        assert_eq!(cipher.decrypt(&mixed, ScalarKind::Int), None);
    }

    #[test]
    fn test_wrong_expected_kind_fails() {
        let cipher = cipher();
        let sealed = cipher.encrypt(&ScalarValue::Bool(true)).unwrap();
        assert_eq!(cipher.decrypt(&sealed, ScalarKind::Int), None);
    }

    quickcheck! {
        fn prop_int_roundtrip(v: i64) -> bool {
            let cipher = cipher();
            let sealed = cipher.encrypt(&ScalarValue::Int(v)).unwrap();
            cipher.decrypt(&sealed, ScalarKind::Int) == Some(ScalarValue::Int(v))
        }

        fn prop_bool_roundtrip(v: bool) -> bool {
            let cipher = cipher();
            let sealed = cipher.encrypt(&ScalarValue::Bool(v)).unwrap();
            cipher.decrypt(&sealed, ScalarKind::Bool) == Some(ScalarValue::Bool(v))
        }
    }
}
