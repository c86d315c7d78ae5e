//! KV-v2 reads for versioned key material.
//!
//! Every KV version of a key path is one key version. Destroyed versions, and
//! versions that were soft-deleted, are skipped.

use crate::vault;
use anyhow::{anyhow, Context, Result};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::{info_span, instrument, Instrument};

/// Field inside each KV secret that holds the key material.
pub const KEY_FIELD: &str = "value";

/// Live versions listed in a KV-v2 metadata response, ascending.
pub(crate) fn live_versions(metadata: &Value) -> Result<Vec<u32>> {
    let versions = metadata
        .get("data")
        .and_then(|data| data.get("versions"))
        .and_then(Value::as_object)
        .context("kv metadata response has no versions")?;

    let mut live = Vec::with_capacity(versions.len());

    for (version, state) in versions {
        let destroyed = state
            .get("destroyed")
            .and_then(Value::as_bool)
            .unwrap_or(false);
        let deleted = state
            .get("deletion_time")
            .and_then(Value::as_str)
            .is_some_and(|time| !time.is_empty());

        if destroyed || deleted {
            continue;
        }

        let version: u32 = version
            .parse()
            .with_context(|| format!("kv version {version} is not an integer"))?;
        live.push(version);
    }

    live.sort_unstable();

    Ok(live)
}

/// Key material from a KV-v2 data response.
pub(crate) fn secret_value(data: &Value) -> Result<String> {
    data.get("data")
        .and_then(|data| data.get("data"))
        .and_then(|data| data.get(KEY_FIELD))
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("kv secret has no {KEY_FIELD} field"))
}

async fn get_json(url: &str, token: &SecretString) -> Result<Value> {
    let span = info_span!(
        "vault.kv.read",
        http.method = "GET",
        url = %url
    );

    let response = vault::client()?
        .get(url)
        .header("X-Vault-Token", token.expose_secret())
        .send()
        .instrument(span)
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        return Err(anyhow!("vault kv read failed: {status} {body}"));
    }

    Ok(response.json().await?)
}

/// List the live versions of `kv_path` under `kv_mount`.
///
/// # Errors
/// Returns an error if the Vault request fails or the metadata cannot be parsed.
#[instrument(skip(token))]
pub async fn read_versions(
    vault_url: &str,
    token: &SecretString,
    kv_mount: &str,
    kv_path: &str,
) -> Result<Vec<u32>> {
    let url = vault::endpoint_url(vault_url, &format!("/v1/{kv_mount}/metadata/{kv_path}"))?;
    let metadata = get_json(&url, token).await?;

    live_versions(&metadata)
}

/// Read one version of `kv_path` under `kv_mount`.
///
/// # Errors
/// Returns an error if the Vault request fails or the secret has no key field.
#[instrument(skip(token))]
pub async fn read_version(
    vault_url: &str,
    token: &SecretString,
    kv_mount: &str,
    kv_path: &str,
    version: u32,
) -> Result<SecretString> {
    let url = vault::endpoint_url(
        vault_url,
        &format!("/v1/{kv_mount}/data/{kv_path}?version={version}"),
    )?;
    let data = get_json(&url, token).await?;

    Ok(SecretString::from(secret_value(&data)?))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn live_versions_skip_destroyed_and_deleted() -> Result<()> {
        let metadata = json!({
            "data": {
                "current_version": 4,
                "versions": {
                    "1": {"created_time": "2024-01-01T00:00:00Z", "deletion_time": "", "destroyed": true},
                    "2": {"created_time": "2024-02-01T00:00:00Z", "deletion_time": "", "destroyed": false},
                    "3": {"created_time": "2024-03-01T00:00:00Z", "deletion_time": "2024-03-02T00:00:00Z", "destroyed": false},
                    "4": {"created_time": "2024-04-01T00:00:00Z", "deletion_time": "", "destroyed": false}
                }
            }
        });

        assert_eq!(live_versions(&metadata)?, vec![2, 4]);
        Ok(())
    }

    #[test]
    fn live_versions_require_versions_map() {
        assert!(live_versions(&json!({"data": {}})).is_err());
        assert!(live_versions(&json!({"data": {"versions": {"x": {}}}})).is_err());
    }

    #[test]
    fn secret_value_reads_key_field() -> Result<()> {
        let data = json!({"data": {"data": {"value": "-----BEGIN PUBLIC KEY-----"}, "metadata": {"version": 2}}});
        assert_eq!(secret_value(&data)?, "-----BEGIN PUBLIC KEY-----");
        assert!(secret_value(&json!({"data": {"data": {}}})).is_err());
        Ok(())
    }
}
