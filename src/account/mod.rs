//! Accounts and their per-device sessions.
//!
//! An [`Account`] owns an ordered list of [`Session`]s, one per device id.
//! The directory methods on `Account` are the only way sessions are created,
//! rotated or revoked in memory.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("no session for device {0}")]
    SessionNotFound(String),
}

/// Key versions used to produce a session's current access token.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionVersions {
    pub asymmetric: u32,
    pub symmetric: u32,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Session {
    pub device_id: String,
    pub token: Option<String>,
    pub token_id: Option<String>,
    pub issued_at: Option<DateTime<Utc>>,
    pub last_login_at: Option<DateTime<Utc>>,
    pub refresh_token: Option<String>,
    pub refresh_issued_at: Option<DateTime<Utc>>,
    pub active: bool,
    pub ip_address: Option<String>,
    pub encryption_versions: Option<EncryptionVersions>,
}

impl Session {
    fn new(device_id: &str) -> Self {
        Self {
            device_id: device_id.to_string(),
            token: None,
            token_id: None,
            issued_at: None,
            last_login_at: None,
            refresh_token: None,
            refresh_issued_at: None,
            active: false,
            ip_address: None,
            encryption_versions: None,
        }
    }

    /// A session can authenticate only while active with a stored token.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.active && self.token.is_some()
    }
}

/// Everything written to a session when a token pair is (re)issued.
#[derive(Clone, Debug)]
pub struct SessionGrant {
    pub token: String,
    pub token_id: String,
    pub issued_at: DateTime<Utc>,
    pub refresh_token: String,
    pub refresh_issued_at: DateTime<Utc>,
    /// `None` keeps the address recorded at the previous issuance.
    pub ip_address: Option<String>,
    pub encryption_versions: EncryptionVersions,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Account {
    pub account_id: Uuid,
    pub identity: String,
    pub is_verified: bool,
    pub is_complete: bool,
    pub two_fa_enabled: bool,
    pub password_hash: String,
    pub sessions: Vec<Session>,
    pub last_login: Option<DateTime<Utc>>,
    pub last_logout: Option<DateTime<Utc>>,
}

/// Identities are matched case-insensitively.
#[must_use]
pub fn normalize_identity(identity: &str) -> String {
    identity.trim().to_lowercase()
}

impl Account {
    #[must_use]
    pub fn new(identity: &str, password_hash: impl Into<String>) -> Self {
        Self {
            account_id: Uuid::now_v7(),
            identity: normalize_identity(identity),
            is_verified: false,
            is_complete: false,
            two_fa_enabled: false,
            password_hash: password_hash.into(),
            sessions: Vec::new(),
            last_login: None,
            last_logout: None,
        }
    }

    /// First session whose device id matches.
    #[must_use]
    pub fn find_by_device(&self, device_id: &str) -> Option<&Session> {
        self.sessions.iter().find(|s| s.device_id == device_id)
    }

    /// Write `grant` to the session for `device_id`, creating it at the end of
    /// the list if absent. An existing session keeps its position; any later
    /// duplicates of the same device id are dropped.
    pub fn upsert(&mut self, device_id: &str, grant: SessionGrant) -> &Session {
        let index = if let Some(index) = self.position(device_id) {
            let mut seen = 0usize;
            self.sessions.retain(|s| {
                if s.device_id != device_id {
                    return true;
                }
                seen += 1;
                seen == 1
            });
            index
        } else {
            self.sessions.push(Session::new(device_id));
            self.sessions.len() - 1
        };

        let session = &mut self.sessions[index];
        session.token = Some(grant.token);
        session.token_id = Some(grant.token_id);
        session.issued_at = Some(grant.issued_at);
        session.last_login_at = Some(grant.issued_at);
        session.refresh_token = Some(grant.refresh_token);
        session.refresh_issued_at = Some(grant.refresh_issued_at);
        session.active = true;
        if grant.ip_address.is_some() {
            session.ip_address = grant.ip_address;
        }
        session.encryption_versions = Some(grant.encryption_versions);

        &self.sessions[index]
    }

    /// Clear the token fields of `device_id`'s session and mark it inactive.
    /// The record stays in the list.
    ///
    /// # Errors
    /// [`DirectoryError::SessionNotFound`] if no session matches.
    pub fn revoke(&mut self, device_id: &str, at: DateTime<Utc>) -> Result<&Session, DirectoryError> {
        let index = self
            .position(device_id)
            .ok_or_else(|| DirectoryError::SessionNotFound(device_id.to_string()))?;

        let session = &mut self.sessions[index];
        session.token = None;
        session.token_id = None;
        session.issued_at = None;
        session.refresh_token = None;
        session.refresh_issued_at = None;
        session.encryption_versions = None;
        session.active = false;
        session.last_login_at = Some(at);

        Ok(&self.sessions[index])
    }

    fn position(&self, device_id: &str) -> Option<usize> {
        self.sessions.iter().position(|s| s.device_id == device_id)
    }
}
