//! # Tether (device session authority)
//!
//! `tether` authenticates devices against user accounts and manages one
//! session per `(account, device id)`:
//!
//! - **Issuance:** a successful credential grant mints an RS256 access token
//!   (24h) plus an opaque refresh token (28 day window) and upserts the
//!   device's session.
//! - **Refresh:** the presented refresh token must equal the stored one; the
//!   pair is rotated, so an old refresh token never works twice.
//! - **Verification:** every protected request must present exactly the
//!   access token stored on the session *and* that token must carry a valid
//!   signature under the key version recorded on the session. Clearing the
//!   stored token therefore revokes a session instantly, without a denylist.
//! - **Revocation:** token fields are cleared in place and the session is
//!   marked inactive; the record stays for audit.
//!
//! ## Key versions
//!
//! Signing keys live in Vault KV-v2; every KV version is a key version.
//! New tokens are signed with the latest version, verification resolves the
//! version pinned on the session so rotation never invalidates tokens that
//! are still within their lifetime. Destroying a version fails those tokens
//! closed.

pub mod account;
pub mod api;
pub mod cli;
pub mod keys;
pub mod session;
pub mod store;
pub mod token;
pub mod vault;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_git_commit_hash_format() {
        if GIT_COMMIT_HASH == "unknown" {
            // Acceptable in non-git build environments
            return;
        }
        assert!(
            GIT_COMMIT_HASH.chars().all(|c| c.is_ascii_hexdigit()),
            "GIT_COMMIT_HASH should be a hex string, got: {GIT_COMMIT_HASH}"
        );
    }

    #[test]
    fn test_app_user_agent_format() {
        assert!(APP_USER_AGENT.starts_with(env!("CARGO_PKG_NAME")));
        assert!(APP_USER_AGENT.contains(env!("CARGO_PKG_VERSION")));
    }
}
