use super::{CredentialVerifier, SessionConfig, SessionError, Touch, TouchQueue};
use crate::account::{Account, EncryptionVersions, SessionGrant};
use crate::keys::{KeyError, KeyKind, KeyRegistry};
use crate::store::{AccountStamp, SessionStore};
use crate::token::{self, Claims};
use chrono::{DateTime, Utc};
use secrecy::{ExposeSecret, SecretString};
use std::sync::Arc;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

/// Credential grant for one device.
#[derive(Debug)]
pub struct IssueRequest {
    pub identity: String,
    pub password: SecretString,
    pub device_id: String,
    pub ip_address: Option<String>,
}

/// A freshly issued (or rotated) token pair.
#[derive(Clone, Debug)]
pub struct Issued {
    pub access_token: String,
    pub refresh_token: String,
    pub token_id: String,
    pub versions: EncryptionVersions,
    /// The account has not finished onboarding.
    pub onboarding_required: bool,
}

#[derive(Clone, Debug)]
pub struct VerifyRequest {
    pub identity: String,
    pub device_id: String,
    pub bearer: Option<String>,
    pub path: String,
}

/// What a protected handler learns about its caller.
#[derive(Clone, Debug)]
pub struct VerifiedSession {
    pub account_id: Uuid,
    pub identity: String,
    pub device_id: String,
    pub is_verified: bool,
    pub is_complete: bool,
    pub two_fa_enabled: bool,
    pub claims: Claims,
}

pub struct SessionManager {
    store: Arc<dyn SessionStore>,
    keys: Arc<dyn KeyRegistry>,
    credentials: Arc<dyn CredentialVerifier>,
    config: SessionConfig,
    touches: TouchQueue,
}

impl std::fmt::Debug for SessionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionManager")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn require<'a>(value: &'a str, what: &'static str) -> Result<&'a str, SessionError> {
    let value = value.trim();
    if value.is_empty() {
        return Err(SessionError::InvalidRequest(what));
    }
    Ok(value)
}

impl SessionManager {
    /// Build the manager and start its background last-login worker.
    /// Must be called inside a Tokio runtime.
    #[must_use]
    pub fn new(
        store: Arc<dyn SessionStore>,
        keys: Arc<dyn KeyRegistry>,
        credentials: Arc<dyn CredentialVerifier>,
        config: SessionConfig,
    ) -> Self {
        let (touches, _worker) = TouchQueue::spawn(
            store.clone(),
            config.touch_queue_size(),
            config.touch_timeout(),
        );

        Self {
            store,
            keys,
            credentials,
            config,
            touches,
        }
    }

    #[must_use]
    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    async fn load_account(&self, identity: &str) -> Result<Account, SessionError> {
        self.store
            .find_account(identity)
            .await?
            .ok_or(SessionError::AccountNotFound)
    }

    /// Mint a token pair under the latest key versions and write it to the
    /// device's session, persisting the session row with a login stamp.
    async fn grant(
        &self,
        account: &mut Account,
        device_id: &str,
        ip_address: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Issued, SessionError> {
        let asymmetric = self.keys.latest_version(KeyKind::AsymmetricPrivate).await?;
        let symmetric = self.keys.latest_version(KeyKind::Symmetric).await?;
        let private_key = self
            .keys
            .get(KeyKind::AsymmetricPrivate, asymmetric)
            .await?
            .ok_or(KeyError::LatestMissing {
                kind: KeyKind::AsymmetricPrivate,
                version: asymmetric,
            })?;

        let minted = token::mint(
            device_id,
            account.account_id,
            &account.identity,
            self.config.audience(),
            private_key.expose_secret(),
            now.timestamp(),
            self.config.access_ttl().num_seconds(),
        )
        .map_err(SessionError::Signing)?;
        let refresh_token = token::generate_refresh_token();
        let versions = EncryptionVersions {
            asymmetric,
            symmetric,
        };

        let session = account
            .upsert(
                device_id,
                SessionGrant {
                    token: minted.token.clone(),
                    token_id: minted.token_id.clone(),
                    issued_at: now,
                    refresh_token: refresh_token.clone(),
                    refresh_issued_at: now,
                    ip_address,
                    encryption_versions: versions,
                },
            )
            .clone();

        self.store
            .save_session(account.account_id, &session, AccountStamp::Login(now))
            .await?;
        account.last_login = Some(now);

        Ok(Issued {
            access_token: minted.token,
            refresh_token,
            token_id: minted.token_id,
            versions,
            onboarding_required: !account.is_complete,
        })
    }

    /// Credential grant: verify the password and issue a token pair for the device.
    ///
    /// # Errors
    /// `InvalidRequest`, `AccountNotFound`, `InvalidCredentials`, or an
    /// internal key/store/credential error. Nothing is persisted on error.
    #[instrument(skip(self, request), fields(device_id = %request.device_id))]
    pub async fn issue(&self, request: IssueRequest) -> Result<Issued, SessionError> {
        let identity = require(&request.identity, "username is required")?;
        let device_id = require(&request.device_id, "device id is required")?;

        let mut account = self.load_account(identity).await?;

        let verifier = self.credentials.clone();
        let password = request.password.clone();
        let stored_hash = account.password_hash.clone();
        let verified =
            tokio::task::spawn_blocking(move || verifier.verify(&password, &stored_hash))
                .await
                .map_err(|err| SessionError::Task(err.to_string()))??;

        if !verified {
            warn!(account_id = %account.account_id, "password mismatch");
            return Err(SessionError::InvalidCredentials);
        }

        let issued = self
            .grant(&mut account, device_id, request.ip_address, Utc::now())
            .await?;

        info!(
            account_id = %account.account_id,
            token_id = %issued.token_id,
            key_version = issued.versions.asymmetric,
            "session issued"
        );

        Ok(issued)
    }

    /// Rotate the token pair of an existing session.
    ///
    /// # Errors
    /// `NoSessionForAccount`, `InvalidRefreshToken`, `RefreshExpired`, or an
    /// internal error.
    #[instrument(skip(self, refresh_token))]
    pub async fn refresh(
        &self,
        identity: &str,
        device_id: &str,
        refresh_token: &str,
    ) -> Result<Issued, SessionError> {
        let identity = require(identity, "username is required")?;
        let device_id = require(device_id, "device id is required")?;
        if refresh_token.is_empty() {
            return Err(SessionError::InvalidRequest("refresh token is required"));
        }

        let mut account = self.load_account(identity).await?;
        let now = Utc::now();

        let session = account
            .find_by_device(device_id)
            .ok_or(SessionError::NoSessionForAccount)?;

        if session.refresh_token.as_deref() != Some(refresh_token) {
            warn!(account_id = %account.account_id, "refresh token mismatch");
            return Err(SessionError::InvalidRefreshToken);
        }

        let issued_at = session
            .refresh_issued_at
            .ok_or(SessionError::InvalidRefreshToken)?;
        if now >= issued_at + self.config.refresh_window() {
            warn!(account_id = %account.account_id, %issued_at, "refresh token expired");
            return Err(SessionError::RefreshExpired);
        }

        let issued = self.grant(&mut account, device_id, None, now).await?;

        info!(
            account_id = %account.account_id,
            token_id = %issued.token_id,
            "session refreshed"
        );

        Ok(issued)
    }

    /// Authenticate a protected request.
    ///
    /// The presented bearer must equal the session's stored token and that
    /// token must verify under the key version pinned on the session.
    ///
    /// # Errors
    /// `TokenMissing`, `NoSessionForAccount`, `TokenMismatch`,
    /// `KeyVersionMissing`, `PemDecode`, `SignatureInvalid`, `TokenExpired`,
    /// `Unauthorized`, or an internal error.
    #[instrument(skip(self, request), fields(device_id = %request.device_id, path = %request.path))]
    pub async fn verify(&self, request: VerifyRequest) -> Result<VerifiedSession, SessionError> {
        let identity = require(&request.identity, "uid is required")?;
        let device_id = require(&request.device_id, "device id is required")?;
        let bearer = request
            .bearer
            .as_deref()
            .filter(|bearer| !bearer.is_empty())
            .ok_or(SessionError::TokenMissing)?;

        // an unknown identity looks the same as an unknown device
        let account = match self.load_account(identity).await {
            Err(SessionError::AccountNotFound) => return Err(SessionError::NoSessionForAccount),
            other => other?,
        };

        let session = account
            .find_by_device(device_id)
            .filter(|session| session.is_live())
            .ok_or(SessionError::NoSessionForAccount)?;

        if session.token.as_deref() != Some(bearer) {
            warn!(account_id = %account.account_id, "presented token is not current");
            return Err(SessionError::TokenMismatch);
        }

        let versions = session
            .encryption_versions
            .ok_or(SessionError::NoSessionForAccount)?;
        let public_key = self
            .keys
            .get(KeyKind::AsymmetricPublic, versions.asymmetric)
            .await?
            .ok_or(SessionError::KeyVersionMissing {
                kind: KeyKind::AsymmetricPublic,
                version: versions.asymmetric,
            })?;

        let claims = token::verify(bearer, public_key.expose_secret(), Utc::now().timestamp())
            .map_err(|err| {
                warn!(account_id = %account.account_id, "token rejected: {err}");
                SessionError::from_verify(err)
            })?;

        if !token::audience_allows(self.config.audience(), &request.path) {
            warn!(account_id = %account.account_id, "path outside audience");
            return Err(SessionError::Unauthorized);
        }

        self.touches.enqueue(Touch {
            account_id: account.account_id,
            device_id: device_id.to_string(),
            at: Utc::now(),
        });

        debug!(account_id = %account.account_id, "token verified");

        Ok(VerifiedSession {
            account_id: account.account_id,
            identity: account.identity.clone(),
            device_id: device_id.to_string(),
            is_verified: account.is_verified,
            is_complete: account.is_complete,
            two_fa_enabled: account.two_fa_enabled,
            claims,
        })
    }

    /// End a device session. The record is kept with its token fields
    /// cleared; revoking an already revoked session succeeds again.
    ///
    /// # Errors
    /// `NoSessionForAccount`, or an internal error.
    #[instrument(skip(self))]
    pub async fn revoke(&self, identity: &str, device_id: &str) -> Result<(), SessionError> {
        let identity = require(identity, "username is required")?;
        let device_id = require(device_id, "device id is required")?;

        let mut account = self.load_account(identity).await?;

        let now = Utc::now();
        let session = account
            .revoke(device_id, now)
            .map_err(|_| SessionError::NoSessionForAccount)?
            .clone();

        self.store
            .save_session(account.account_id, &session, AccountStamp::Logout(now))
            .await?;

        info!(account_id = %account.account_id, "session revoked");

        Ok(())
    }
}
