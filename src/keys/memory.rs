use super::{KeyError, KeyKind, KeyRegistry, KeyRing};
use async_trait::async_trait;
use secrecy::SecretString;
use std::collections::HashMap;
use tokio::sync::RwLock;

/// Process-local registry with explicitly managed versions.
///
/// Used by tests and local development to stand in for Vault with
/// deterministic key material.
#[derive(Debug, Default)]
pub struct StaticKeyRegistry {
    rings: RwLock<HashMap<KeyKind, KeyRing>>,
}

impl StaticKeyRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) one version of a key.
    pub async fn insert(&self, kind: KeyKind, version: u32, material: impl Into<String>) {
        let mut rings = self.rings.write().await;
        rings
            .entry(kind)
            .or_default()
            .insert(version, SecretString::from(material.into()));
    }

    /// Register an asymmetric key pair under one version.
    pub async fn insert_pair(
        &self,
        version: u32,
        private_pem: impl Into<String>,
        public_pem: impl Into<String>,
    ) {
        self.insert(KeyKind::AsymmetricPrivate, version, private_pem)
            .await;
        self.insert(KeyKind::AsymmetricPublic, version, public_pem)
            .await;
    }

    /// Drop a version, as if it had been destroyed upstream.
    pub async fn destroy(&self, kind: KeyKind, version: u32) -> bool {
        let mut rings = self.rings.write().await;
        rings
            .get_mut(&kind)
            .and_then(|ring| ring.remove(version))
            .is_some()
    }
}

#[async_trait]
impl KeyRegistry for StaticKeyRegistry {
    async fn get(&self, kind: KeyKind, version: u32) -> Result<Option<SecretString>, KeyError> {
        let rings = self.rings.read().await;
        Ok(rings.get(&kind).and_then(|ring| ring.get(version)).cloned())
    }

    async fn latest_version(&self, kind: KeyKind) -> Result<u32, KeyError> {
        let rings = self.rings.read().await;
        rings
            .get(&kind)
            .and_then(KeyRing::latest_version)
            .ok_or(KeyError::NoVersions(kind))
    }
}
