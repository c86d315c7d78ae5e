//! Versioned key registry.
//!
//! Key material is addressed by `(KeyKind, version)`. Versions are monotonic
//! integers; the highest available version of a kind is authoritative for new
//! issuance, while any still-available version can be resolved for
//! verification.

mod memory;
mod vault;

pub use memory::StaticKeyRegistry;
pub use vault::{VaultKeyConfig, VaultKeyRegistry};

use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyKind {
    AsymmetricPrivate,
    AsymmetricPublic,
    Symmetric,
}

impl KeyKind {
    pub const ALL: [Self; 3] = [
        Self::AsymmetricPrivate,
        Self::AsymmetricPublic,
        Self::Symmetric,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::AsymmetricPrivate => "private_key",
            Self::AsymmetricPublic => "public_key",
            Self::Symmetric => "symmetric_key",
        }
    }
}

impl fmt::Display for KeyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum KeyError {
    #[error("no {0} versions available")]
    NoVersions(KeyKind),
    #[error("latest {kind} version {version} cannot be resolved")]
    LatestMissing { kind: KeyKind, version: u32 },
    #[error("key registry unavailable: {0}")]
    Unavailable(String),
}

/// Lookup interface consumed by the session core.
#[async_trait]
pub trait KeyRegistry: Send + Sync {
    /// Resolve a specific version. `Ok(None)` means the version does not exist
    /// (never created, or destroyed).
    async fn get(&self, kind: KeyKind, version: u32) -> Result<Option<SecretString>, KeyError>;

    /// Highest available version for `kind`.
    async fn latest_version(&self, kind: KeyKind) -> Result<u32, KeyError>;
}

/// All available versions of one key kind.
#[derive(Clone, Debug, Default)]
pub struct KeyRing {
    versions: BTreeMap<u32, SecretString>,
}

impl KeyRing {
    pub fn insert(&mut self, version: u32, material: SecretString) {
        self.versions.insert(version, material);
    }

    pub fn remove(&mut self, version: u32) -> Option<SecretString> {
        self.versions.remove(&version)
    }

    #[must_use]
    pub fn get(&self, version: u32) -> Option<&SecretString> {
        self.versions.get(&version)
    }

    #[must_use]
    pub fn latest_version(&self) -> Option<u32> {
        self.versions.keys().next_back().copied()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.versions.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.versions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;

    #[test]
    fn key_ring_latest_is_highest_version() {
        let mut ring = KeyRing::default();
        assert_eq!(ring.latest_version(), None);

        ring.insert(2, SecretString::from("two".to_string()));
        ring.insert(7, SecretString::from("seven".to_string()));
        ring.insert(3, SecretString::from("three".to_string()));
        assert_eq!(ring.latest_version(), Some(7));
        assert_eq!(ring.len(), 3);

        ring.remove(7);
        assert_eq!(ring.latest_version(), Some(3));
        assert_eq!(ring.get(2).map(|key| key.expose_secret()), Some("two"));
        assert!(ring.get(7).is_none());
    }

    #[test]
    fn key_kind_names() {
        assert_eq!(KeyKind::AsymmetricPrivate.to_string(), "private_key");
        assert_eq!(KeyKind::AsymmetricPublic.as_str(), "public_key");
        assert_eq!(KeyKind::Symmetric.as_str(), "symmetric_key");
    }
}
