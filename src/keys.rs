//! Key ownership.
//!
//! A [`KeyRing`] holds the three independent secrets the pipeline needs:
//!
//! ```text
//! encryption_key -> Field Cipher (AES-256-GCM)
//! hmac_key       -> Row Authenticator (HMAC-SHA-256)
//! ope_key        -> Order-Preserving Codec (HMAC-SHA-256 PRF)
//! ```
//!
//! The ring is loaded once at process start and shared read-only (usually
//! as `Arc<KeyRing>`). It is not `Clone` and is zeroised on drop. No
//! operation mutates key material and nothing re-reads keys per request.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::config::VaultConfig;
use crate::crypto::{self, KEY_LEN};
use crate::error::VaultError;

/// The process-wide key material.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct KeyRing {
    encryption: [u8; KEY_LEN],
    authentication: [u8; KEY_LEN],
    order_preserving: [u8; KEY_LEN],
}

impl KeyRing {
    /// Construct a `KeyRing` from raw bytes.
    ///
    /// In production these bytes come from the key provisioning collaborator
    /// via [`KeyRing::from_config`].
    pub fn from_bytes(
        encryption: [u8; KEY_LEN],
        authentication: [u8; KEY_LEN],
        order_preserving: [u8; KEY_LEN],
    ) -> Self {
        Self {
            encryption,
            authentication,
            order_preserving,
        }
    }

    /// Build the ring from a loaded configuration. Every key must be present
    /// and decode to exactly 32 bytes, otherwise a `Configuration` error names
    /// the offending key.
    pub fn from_config(config: &VaultConfig) -> Result<Self, VaultError> {
        Ok(Self {
            encryption: decode_key("encryption_key", config.encryption_key.as_deref())?,
            authentication: decode_key("hmac_key", config.hmac_key.as_deref())?,
            order_preserving: decode_key("ope_key", config.ope_key.as_deref())?,
        })
    }

    /// Generate three fresh random keys.
    pub fn generate() -> Result<Self, VaultError> {
        Ok(Self {
            encryption: crypto::generate_random_key()?,
            authentication: crypto::generate_random_key()?,
            order_preserving: crypto::generate_random_key()?,
        })
    }

    pub(crate) fn encryption(&self) -> &[u8; KEY_LEN] {
        &self.encryption
    }

    pub(crate) fn authentication(&self) -> &[u8; KEY_LEN] {
        &self.authentication
    }

    pub(crate) fn order_preserving(&self) -> &[u8; KEY_LEN] {
        &self.order_preserving
    }
}

impl std::fmt::Debug for KeyRing {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("KeyRing { .. }")
    }
}

fn decode_key(name: &str, value: Option<&str>) -> Result<[u8; KEY_LEN], VaultError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| VaultError::Configuration(format!("missing key: {name}")))?;

    let mut key = [0u8; KEY_LEN];
    hex::decode_to_slice(value, &mut key).map_err(|_| {
        VaultError::Configuration(format!("{name} must be {KEY_LEN} hex-encoded bytes"))
    })?;
    Ok(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hex_key(byte: u8) -> Option<String> {
        Some(hex::encode([byte; KEY_LEN]))
    }

    #[test]
    fn test_from_config_loads_all_keys() {
        let config = VaultConfig {
            encryption_key: hex_key(1),
            hmac_key: hex_key(2),
            ope_key: hex_key(3),
        };
        let ring = KeyRing::from_config(&config).unwrap();
        assert_eq!(ring.encryption(), &[1u8; KEY_LEN]);
        assert_eq!(ring.authentication(), &[2u8; KEY_LEN]);
        assert_eq!(ring.order_preserving(), &[3u8; KEY_LEN]);
    }

    #[test]
    fn test_missing_key_is_configuration_error() {
        let config = VaultConfig {
            encryption_key: hex_key(1),
            hmac_key: None,
            ope_key: hex_key(3),
        };
        match KeyRing::from_config(&config) {
            Err(VaultError::Configuration(msg)) => assert!(msg.contains("hmac_key")),
            other => panic!("expected configuration error, got {other:?}"),
        }
    }

    #[test]
    fn test_short_key_is_configuration_error() {
        let config = VaultConfig {
            encryption_key: hex_key(1),
            hmac_key: hex_key(2),
            ope_key: Some("abcd".into()),
        };
        assert!(matches!(
            KeyRing::from_config(&config),
            Err(VaultError::Configuration(_))
        ));
    }

    #[test]
    fn test_debug_hides_material() {
        let ring = KeyRing::from_bytes([9u8; KEY_LEN], [9u8; KEY_LEN], [9u8; KEY_LEN]);
        assert_eq!(format!("{ring:?}"), "KeyRing { .. }");
    }
}
