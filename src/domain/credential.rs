//! Registry credentials.
//!
//! A credential is bound to exactly one registry target. It is fetched when
//! its stage starts and dropped when that stage ends; it is never serialized
//! and its secret never appears in `Debug` output.

use std::fmt;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Which registry a publish stage talks to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RegistryTarget {
    Staging,
    Production,
}

impl fmt::Display for RegistryTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegistryTarget::Staging => f.write_str("staging"),
            RegistryTarget::Production => f.write_str("production"),
        }
    }
}

/// Opaque (identity, secret) pair for one registry target
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    target: RegistryTarget,
    identity: String,
    secret: String,
}

impl Credential {
    pub fn new(
        target: RegistryTarget,
        identity: impl Into<String>,
        secret: impl Into<String>,
    ) -> Self {
        Self {
            target,
            identity: identity.into(),
            secret: secret.into(),
        }
    }

    pub fn target(&self) -> RegistryTarget {
        self.target
    }

    pub fn identity(&self) -> &str {
        &self.identity
    }

    /// Raw secret, for handing to the registry client only
    pub fn expose_secret(&self) -> &str {
        &self.secret
    }

    /// Stable, non-reversible id of the principal this credential
    /// authenticates as. Ignores the target, so credentials for different
    /// registries can be compared without holding both secrets.
    pub fn principal_id(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.identity.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.secret.as_bytes());
        hex::encode(hasher.finalize())
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("target", &self.target)
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .finish()
    }
}
