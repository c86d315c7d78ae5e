use crate::cli::actions::{server::Args, Action};
use anyhow::{Context, Result};

fn required(matches: &clap::ArgMatches, name: &str) -> Result<String> {
    matches
        .get_one::<String>(name)
        .cloned()
        .with_context(|| format!("missing required argument: --{name}"))
}

/// # Errors
/// Returns an error if required arguments are missing.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    Ok(Action::Server(Args {
        port: matches.get_one::<u16>("port").copied().unwrap_or(8080),
        dsn: required(matches, "dsn")?,
        vault_url: required(matches, "vault-url")?,
        vault_role_id: required(matches, "vault-role-id")?,
        vault_secret_id: matches.get_one::<String>("vault-secret-id").cloned(),
        vault_wrapped_token: matches.get_one::<String>("vault-wrapped-token").cloned(),
        vault_kv_mount: required(matches, "vault-kv-mount")?,
        vault_db_role: required(matches, "vault-db-role")?,
        private_key_path: required(matches, "private-key-path")?,
        public_key_path: required(matches, "public-key-path")?,
        symmetric_key_path: required(matches, "symmetric-key-path")?,
        key_reload_seconds: matches
            .get_one::<u64>("key-reload-seconds")
            .copied()
            .unwrap_or(300),
        audience: matches
            .get_many::<String>("audience")
            .map(|values| values.cloned().collect())
            .unwrap_or_default(),
        touch_timeout_seconds: matches
            .get_one::<u64>("touch-timeout-seconds")
            .copied()
            .unwrap_or(5),
        touch_queue_size: matches
            .get_one::<usize>("touch-queue-size")
            .copied()
            .unwrap_or(1024),
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cli::commands;

    #[test]
    fn server_action_carries_every_option() -> Result<()> {
        temp_env::with_vars([("TETHER_AUDIENCE", None::<String>)], || {
            let matches = commands::new().get_matches_from([
                "tether",
                "--port",
                "9090",
                "--dsn",
                "postgres://localhost/tether",
                "--vault-url",
                "https://vault.tld:8200/v1/auth/approle/login",
                "--vault-role-id",
                "role",
                "--vault-wrapped-token",
                "wrapped",
                "--private-key-path",
                "signing/private",
                "--touch-queue-size",
                "8",
            ]);

            let Action::Server(args) = handler(&matches)?;
            assert_eq!(args.port, 9090);
            assert_eq!(args.vault_wrapped_token.as_deref(), Some("wrapped"));
            assert_eq!(args.private_key_path, "signing/private");
            assert_eq!(args.public_key_path, "keys/public_key");
            assert_eq!(args.touch_queue_size, 8);
            assert_eq!(args.audience, ["/v1"]);
            Ok(())
        })
    }
}
