use crate::{cli::globals::GlobalArgs, vault};
use anyhow::{anyhow, Result};
use secrecy::{ExposeSecret, SecretString};
use serde_json::Value;
use tracing::instrument;

/// Dynamic credentials issued by Vault's database engine.
#[derive(Debug)]
pub struct DatabaseCreds {
    pub lease_id: String,
    pub lease_duration: u64,
    pub username: String,
    pub password: SecretString,
}

pub(crate) fn parse_creds(json_response: &Value) -> Result<DatabaseCreds> {
    let lease_id = json_response
        .get("lease_id")
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_id found"))?;

    let lease_duration = json_response
        .get("lease_duration")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))?;

    let username = json_response
        .get("data")
        .and_then(|v| v.get("username"))
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no username found"))?;

    let password = json_response
        .get("data")
        .and_then(|v| v.get("password"))
        .and_then(Value::as_str)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no password found"))?;

    Ok(DatabaseCreds {
        lease_id: lease_id.to_string(),
        lease_duration,
        username: username.to_string(),
        password: SecretString::from(password.to_string()),
    })
}

/// Get DB credentials for `role` from Vault and store them in `globals`.
/// # Errors
/// Returns an error if the Vault request fails, Vault returns a non-success status, or the response is missing expected fields.
#[instrument(skip(globals))]
pub async fn database_creds(globals: &mut GlobalArgs, role: &str) -> Result<()> {
    let db_creds = vault::endpoint_url(&globals.vault_url, &format!("/v1/database/creds/{role}"))?;

    let response = vault::client()?
        .get(db_creds.as_str())
        .header("X-Vault-Token", globals.vault_token.expose_secret())
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let json_response: Value = response.json().await?;

        return Err(anyhow!(
            "{} - {}, {}",
            db_creds,
            status,
            vault::vault_error_message(&json_response)
        ));
    }

    let json_response: Value = response.json().await?;
    let creds = parse_creds(&json_response)?;

    globals.vault_db_lease_id = creds.lease_id;
    globals.vault_db_lease_duration = creds.lease_duration;
    globals.vault_db_username = creds.username;
    globals.vault_db_password = creds.password;

    Ok(())
}
