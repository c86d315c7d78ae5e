use crate::{cli::globals::GlobalArgs, vault};
use anyhow::{anyhow, Result};
use rand::{rngs::StdRng, Rng, SeedableRng};
use secrecy::{ExposeSecret, SecretString};
use serde_json::{json, Value};
use tokio::{
    sync::mpsc,
    time::{sleep, Duration},
};
use tracing::{debug, error, instrument, warn};

/// Renew the Vault client token, returning the new lease duration.
#[instrument(skip(token))]
async fn renew_token(url: &str, token: &SecretString) -> Result<u64> {
    let renew_url = vault::endpoint_url(url, "/v1/auth/token/renew-self")?;

    let response = vault::client()?
        .post(&renew_url)
        .json(&json!({ "increment": 0 }))
        .header("X-Vault-Token", token.expose_secret())
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let json_response: Value = response.json().await?;

        return Err(anyhow!(
            "{} - {}, {}",
            renew_url,
            status,
            vault::vault_error_message(&json_response)
        ));
    }

    let json_response: Value = response.json().await?;

    json_response
        .get("auth")
        .and_then(|v| v.get("lease_duration"))
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))
}

/// Renew the database credentials lease.
#[instrument(skip(token))]
async fn renew_db_lease(
    url: &str,
    token: &SecretString,
    lease_id: &str,
    increment: u64,
) -> Result<u64> {
    let renew_url = vault::endpoint_url(url, "/v1/sys/leases/renew")?;

    let response = vault::client()?
        .put(&renew_url)
        .json(&json!({ "lease_id": lease_id, "increment": increment }))
        .header("X-Vault-Token", token.expose_secret())
        .send()
        .await?;

    if !response.status().is_success() {
        let status = response.status();
        let json_response: Value = response.json().await?;

        return Err(anyhow!(
            "{} - {}, {}",
            renew_url,
            status,
            vault::vault_error_message(&json_response)
        ));
    }

    let json_response: Value = response.json().await?;

    json_response
        .get("lease_duration")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("Error parsing JSON response: no lease_duration found"))
}

/// Jittered sleep between renewals: 70-90% of the lease.
fn jittered(lease_duration: u64, rng: &mut StdRng) -> Duration {
    let factor = rng.gen_range(70..90);
    Duration::from_secs(lease_duration * factor / 100)
}

/// Keep the Vault token and the database lease alive.
///
/// After three failed attempts in a row a message is sent on `tx` so the
/// server can shut down gracefully instead of running with dead credentials.
///
/// # Errors
/// Currently infallible; kept fallible so callers treat setup uniformly.
#[instrument(skip(globals, tx))]
pub async fn try_renew(globals: &GlobalArgs, tx: mpsc::UnboundedSender<()>) -> Result<()> {
    tokio::spawn({
        let mut rng = StdRng::from_entropy();
        let url = globals.vault_url.clone();
        let token = globals.vault_token.clone();
        let tx = tx.clone();

        async move {
            loop {
                let mut next = Duration::default();

                for attempt in 1..=3 {
                    let backoff_time = 2u64.pow(attempt - 1);

                    if attempt > 1 {
                        warn!("Backing off for {} seconds", backoff_time);
                        sleep(Duration::from_secs(backoff_time)).await;
                    }

                    match renew_token(&url, &token).await {
                        Ok(lease_duration) => {
                            next = jittered(lease_duration, &mut rng);
                            break;
                        }

                        Err(e) => {
                            error!("Failed to renew token: {}", e);

                            if attempt == 3 {
                                error!("Failed to renew token after 3 attempts: {}", e);
                                let _ = tx.send(());
                                return;
                            }
                        }
                    }
                }

                debug!("Will renew token in {} seconds", next.as_secs());

                sleep(next).await;
            }
        }
    });

    tokio::spawn({
        let mut rng = StdRng::from_entropy();
        let url = globals.vault_url.clone();
        let token = globals.vault_token.clone();
        let lease_id = globals.vault_db_lease_id.clone();
        let lease_duration = globals.vault_db_lease_duration;
        let tx = tx.clone();

        async move {
            // first renewal happens once the initial lease is mostly consumed
            let mut next = jittered(lease_duration, &mut rng);

            loop {
                sleep(next).await;

                for attempt in 1..=3 {
                    let backoff_time = 2u64.pow(attempt - 1);

                    if attempt > 1 {
                        warn!("Backing off for {} seconds", backoff_time);
                        sleep(Duration::from_secs(backoff_time)).await;
                    }

                    match renew_db_lease(&url, &token, &lease_id, lease_duration).await {
                        Ok(renewed) => {
                            next = jittered(renewed, &mut rng);
                            break;
                        }

                        Err(e) => {
                            error!("Failed to renew DB lease: {}", e);

                            if attempt == 3 {
                                error!("Failed to renew DB lease after 3 attempts: {}", e);
                                let _ = tx.send(());
                                return;
                            }
                        }
                    }
                }

                debug!("Will renew DB lease in {} seconds", next.as_secs());
            }
        }
    });

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn jitter_stays_within_lease() {
        let mut rng = StdRng::seed_from_u64(7);
        for _ in 0..100 {
            let next = jittered(100, &mut rng);
            assert!(next >= Duration::from_secs(70));
            assert!(next < Duration::from_secs(90));
        }
    }
}
