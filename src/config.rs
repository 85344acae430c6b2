//! Key provisioning configuration.
//!
//! Keys arrive hex-encoded, either from a JSON file or from the process
//! environment. Presence is not checked here; [`KeyRing::from_config`]
//! rejects a missing key as a fatal startup condition.
//!
//! [`KeyRing::from_config`]: crate::keys::KeyRing::from_config

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// Environment variable holding the confidentiality key.
pub const ENV_ENCRYPTION_KEY: &str = "CHAINVAULT_ENCRYPTION_KEY";
/// Environment variable holding the row authentication key.
pub const ENV_HMAC_KEY: &str = "CHAINVAULT_HMAC_KEY";
/// Environment variable holding the order-preserving codec key.
pub const ENV_OPE_KEY: &str = "CHAINVAULT_OPE_KEY";

/// Hex-encoded key material as supplied by the operator.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VaultConfig {
    pub encryption_key: Option<String>,
    pub hmac_key: Option<String>,
    pub ope_key: Option<String>,
}

impl VaultConfig {
    /// Read a JSON configuration file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, VaultError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| {
            VaultError::Configuration(format!("cannot read {}: {e}", path.display()))
        })?;
        serde_json::from_str(&raw).map_err(|e| {
            VaultError::Configuration(format!("cannot parse {}: {e}", path.display()))
        })
    }

    /// Read the `CHAINVAULT_*` environment variables.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        Self {
            encryption_key: lookup(ENV_ENCRYPTION_KEY),
            hmac_key: lookup(ENV_HMAC_KEY),
            ope_key: lookup(ENV_OPE_KEY),
        }
    }
}
