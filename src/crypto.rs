//! Low-level cryptographic operations.
//!
//! This module is the only place in the crate that imports `ring`. Every
//! other module seals, opens, signs and hashes exclusively through the types
//! and functions exposed here.
//!
//! Primitive choices:
//! - **Cipher**: AES-256-GCM (authenticated encryption, no associated data)
//! - **Nonce**: 96-bit (12 bytes), generated fresh per operation via `SystemRandom`
//! - **MAC**: HMAC-SHA-256
//! - **Hash**: SHA-256
//! - **Key size**: 256 bits (32 bytes)

use ring::aead::{self, LessSafeKey, Nonce, UnboundKey, AES_256_GCM};
use ring::digest;
use ring::hmac;
use ring::rand::{SecureRandom, SystemRandom};
use subtle::ConstantTimeEq;

use crate::error::VaultError;

/// The AEAD algorithm used for confidential fields.
const ALGORITHM: &aead::Algorithm = &AES_256_GCM;

/// Size of the nonce in bytes (96 bits).
pub const NONCE_LEN: usize = 12;

/// Size of every key in bytes (256 bits).
pub const KEY_LEN: usize = 32;

/// Size of an HMAC-SHA-256 tag and of a SHA-256 digest.
pub const DIGEST_LEN: usize = 32;

/// Generate a cryptographically secure random nonce.
///
/// A fresh nonce is drawn for every encryption call. There is no nonce
/// caching or counter-based generation.
fn generate_nonce() -> Result<[u8; NONCE_LEN], VaultError> {
    let rng = SystemRandom::new();
    let mut buf = [0u8; NONCE_LEN];
    rng.fill(&mut buf).map_err(|_| VaultError::RandomnessFailure)?;
    Ok(buf)
}

/// An AES-256-GCM key, bound once at startup.
pub(crate) struct AeadKey(LessSafeKey);

impl AeadKey {
    pub(crate) fn new(key_bytes: &[u8; KEY_LEN]) -> Result<Self, VaultError> {
        let unbound = UnboundKey::new(ALGORITHM, key_bytes).map_err(|_| VaultError::InvalidKey)?;
        Ok(Self(LessSafeKey::new(unbound)))
    }

    /// Encrypt `plaintext` under a fresh random nonce.
    ///
    /// Returns the ciphertext (with the GCM tag appended) and the nonce. The
    /// two are stored side by side; the nonce is not secret.
    pub(crate) fn seal(
        &self,
        plaintext: &[u8],
    ) -> Result<(Vec<u8>, [u8; NONCE_LEN]), VaultError> {
        let nonce_bytes = generate_nonce()?;
        let nonce = Nonce::assume_unique_for_key(nonce_bytes);

        let mut output = Vec::with_capacity(plaintext.len() + ALGORITHM.tag_len());
        output.extend_from_slice(plaintext);
        self.0
            .seal_in_place_append_tag(nonce, aead::Aad::empty(), &mut output)
            .map_err(|_| VaultError::EncryptionFailure)?;

        Ok((output, nonce_bytes))
    }

    /// Decrypt a ciphertext produced by [`AeadKey::seal`].
    ///
    /// Returns `None` if the tag check fails (wrong key or tampering). The
    /// caller receives no partial plaintext.
    pub(crate) fn open(&self, ciphertext: &[u8], nonce: &[u8; NONCE_LEN]) -> Option<Vec<u8>> {
        let nonce = Nonce::assume_unique_for_key(*nonce);
        let mut payload = ciphertext.to_vec();
        let plaintext = self
            .0
            .open_in_place(nonce, aead::Aad::empty(), &mut payload)
            .ok()?;
        Some(plaintext.to_vec())
    }
}

/// An HMAC-SHA-256 key.
#[derive(Clone)]
pub(crate) struct MacKey(hmac::Key);

impl MacKey {
    pub(crate) fn new(key_bytes: &[u8]) -> Self {
        Self(hmac::Key::new(hmac::HMAC_SHA256, key_bytes))
    }

    /// Sign the concatenation of `parts`.
    pub(crate) fn sign(&self, parts: &[&[u8]]) -> [u8; DIGEST_LEN] {
        let mut ctx = hmac::Context::with_key(&self.0);
        for part in parts {
            ctx.update(part);
        }
        let mut out = [0u8; DIGEST_LEN];
        out.copy_from_slice(ctx.sign().as_ref());
        out
    }

    /// Constant-time tag check over the concatenation of `parts`.
    pub(crate) fn verify(&self, parts: &[&[u8]], tag: &[u8]) -> bool {
        ct_eq(&self.sign(parts), tag)
    }
}

/// SHA-256 over the concatenation of `parts`.
pub(crate) fn sha256(parts: &[&[u8]]) -> [u8; DIGEST_LEN] {
    let mut ctx = digest::Context::new(&digest::SHA256);
    for part in parts {
        ctx.update(part);
    }
    let mut out = [0u8; DIGEST_LEN];
    out.copy_from_slice(ctx.finish().as_ref());
    out
}

/// Timing-safe equality for fixed-length values.
pub(crate) fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    bool::from(a.ct_eq(b))
}

/// Generate a cryptographically secure random key.
///
/// This is the only function in the crate that produces raw key material from
/// scratch. It backs `generate_key_ring()` in the public API.
pub fn generate_random_key() -> Result<[u8; KEY_LEN], VaultError> {
    let rng = SystemRandom::new();
    let mut key = [0u8; KEY_LEN];
    rng.fill(&mut key).map_err(|_| VaultError::RandomnessFailure)?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seal_open_roundtrip() {
        let key = AeadKey::new(&[7u8; KEY_LEN]).unwrap();
        let (ct, nonce) = key.seal(b"42").unwrap();
        assert_eq!(key.open(&ct, &nonce).unwrap(), b"42");
    }

    #[test]
    fn test_fresh_nonce_per_seal() {
        let key = AeadKey::new(&[7u8; KEY_LEN]).unwrap();
        let (ct_a, nonce_a) = key.seal(b"same").unwrap();
        let (ct_b, nonce_b) = key.seal(b"same").unwrap();
        assert_ne!(nonce_a, nonce_b);
        assert_ne!(ct_a, ct_b);
    }

    #[test]
    fn test_open_rejects_wrong_key() {
        let key = AeadKey::new(&[1u8; KEY_LEN]).unwrap();
        let other = AeadKey::new(&[2u8; KEY_LEN]).unwrap();
        let (ct, nonce) = key.seal(b"secret").unwrap();
        assert!(other.open(&ct, &nonce).is_none());
    }

    #[test]
    fn test_mac_sign_matches_single_part_verify() {
        let key = MacKey::new(&[3u8; KEY_LEN]);
        let tag = key.sign(&[&b"ab"[..], &b"cd"[..]]);
        assert!(key.verify(&[&b"abcd"[..]], &tag));
        assert!(!key.verify(&[&b"abce"[..]], &tag));
        assert!(!key.verify(&[&b"abcd"[..]], &tag[..31]));
    }

    #[test]
    fn test_ct_eq() {
        assert!(ct_eq(&[1, 2, 3], &[1, 2, 3]));
        assert!(!ct_eq(&[1, 2, 3], &[1, 2, 4]));
        assert!(!ct_eq(&[1, 2, 3], &[1, 2]));
    }
}
