use super::{KeyError, KeyKind, KeyRegistry, KeyRing};
use crate::vault::kv;
use anyhow::Result;
use async_trait::async_trait;
use secrecy::SecretString;
use std::{collections::HashMap, sync::Arc, time::Duration};
use tokio::{sync::RwLock, task::JoinHandle};
use tracing::{debug, error, info, instrument};

/// Where each key kind lives in Vault KV-v2.
#[derive(Clone, Debug)]
pub struct VaultKeyConfig {
    pub vault_url: String,
    pub kv_mount: String,
    pub private_key_path: String,
    pub public_key_path: String,
    pub symmetric_key_path: String,
}

impl VaultKeyConfig {
    #[must_use]
    pub fn path(&self, kind: KeyKind) -> &str {
        match kind {
            KeyKind::AsymmetricPrivate => &self.private_key_path,
            KeyKind::AsymmetricPublic => &self.public_key_path,
            KeyKind::Symmetric => &self.symmetric_key_path,
        }
    }
}

/// Key registry backed by Vault KV-v2.
///
/// All live versions are cached in memory. `reload` fetches a complete new
/// snapshot and swaps it in; on failure the previous snapshot stays.
pub struct VaultKeyRegistry {
    config: VaultKeyConfig,
    token: SecretString,
    rings: RwLock<HashMap<KeyKind, KeyRing>>,
}

impl std::fmt::Debug for VaultKeyRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VaultKeyRegistry")
            .field("config", &self.config)
            .field("token", &"***")
            .finish_non_exhaustive()
    }
}

impl VaultKeyRegistry {
    /// Build the registry and perform the initial load.
    ///
    /// # Errors
    /// Returns an error if any key kind cannot be read or has no live versions.
    pub async fn load(config: VaultKeyConfig, token: SecretString) -> Result<Self> {
        let registry = Self {
            config,
            token,
            rings: RwLock::new(HashMap::new()),
        };
        registry.reload().await?;
        Ok(registry)
    }

    /// Re-read every live version of every key kind.
    ///
    /// # Errors
    /// Returns an error if Vault cannot be read or a kind has no live versions.
    #[instrument(skip(self), fields(kv_mount = %self.config.kv_mount))]
    pub async fn reload(&self) -> Result<()> {
        let mut fresh = HashMap::with_capacity(KeyKind::ALL.len());

        for kind in KeyKind::ALL {
            let path = self.config.path(kind);
            let versions =
                kv::read_versions(&self.config.vault_url, &self.token, &self.config.kv_mount, path)
                    .await?;

            let mut ring = KeyRing::default();
            for version in versions {
                let material = kv::read_version(
                    &self.config.vault_url,
                    &self.token,
                    &self.config.kv_mount,
                    path,
                    version,
                )
                .await?;
                ring.insert(version, material);
            }

            if ring.is_empty() {
                return Err(KeyError::NoVersions(kind).into());
            }

            debug!(
                kind = %kind,
                versions = ring.len(),
                latest = ?ring.latest_version(),
                "loaded key versions"
            );
            fresh.insert(kind, ring);
        }

        *self.rings.write().await = fresh;

        info!("key registry reloaded");

        Ok(())
    }

    /// Reload on a fixed interval until the returned task is aborted.
    pub fn spawn_reload(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // the first tick completes immediately and `load` already ran
            ticker.tick().await;

            loop {
                ticker.tick().await;

                if let Err(err) = self.reload().await {
                    error!("Failed to reload key registry: {err:#}");
                }
            }
        })
    }
}

#[async_trait]
impl KeyRegistry for VaultKeyRegistry {
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_maps_kinds_to_paths() {
        let config = VaultKeyConfig {
            vault_url: "http://127.0.0.1:8200".to_string(),
            kv_mount: "secret/tether".to_string(),
            private_key_path: "keys/private_key".to_string(),
            public_key_path: "keys/public_key".to_string(),
            symmetric_key_path: "keys/symmetric_key".to_string(),
        };

        assert_eq!(config.path(KeyKind::AsymmetricPrivate), "keys/private_key");
        assert_eq!(config.path(KeyKind::AsymmetricPublic), "keys/public_key");
        assert_eq!(config.path(KeyKind::Symmetric), "keys/symmetric_key");
    }

    #[tokio::test]
    async fn load_fails_when_vault_is_unreachable() {
        let config = VaultKeyConfig {
            // port 9 (discard) is closed on test hosts
            vault_url: "http://127.0.0.1:9".to_string(),
            kv_mount: "secret".to_string(),
            private_key_path: "p".to_string(),
            public_key_path: "q".to_string(),
            symmetric_key_path: "s".to_string(),
        };

        let result = VaultKeyRegistry::load(config, SecretString::from("t".to_string())).await;
        assert!(result.is_err());
    }
}
