//! Session lifecycle: issue, refresh, verify, revoke.
//!
//! Per `(account, device)` a session moves from *unissued* to *active*, stays
//! active across refreshes (each one rotating both tokens) and ends *revoked*.
//! A revoked session keeps its record but can never authenticate again.

mod config;
mod credentials;
mod manager;
mod touch;

pub use config::{
    SessionConfig, DEFAULT_ACCESS_TTL_SECONDS, DEFAULT_AUDIENCE, DEFAULT_REFRESH_WINDOW_DAYS,
    DEFAULT_TOUCH_QUEUE_SIZE, DEFAULT_TOUCH_TIMEOUT_SECONDS,
};
pub use credentials::{hash_password, Argon2Verifier, CredentialError, CredentialVerifier};
pub use manager::{
    IssueRequest, Issued, SessionManager, VerifiedSession, VerifyRequest,
};
pub use touch::{Touch, TouchQueue};

use crate::{keys::KeyError, keys::KeyKind, store::StoreError, token};
use thiserror::Error;

/// Coarse status class a [`SessionError`] is reported under.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ErrorClass {
    BadRequest,
    NotFound,
    Unauthorized,
    Internal,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("invalid request: {0}")]
    InvalidRequest(&'static str),
    #[error("account not found")]
    AccountNotFound,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("no session for this account and device")]
    NoSessionForAccount,
    #[error("invalid refresh token")]
    InvalidRefreshToken,
    #[error("refresh token expired")]
    RefreshExpired,
    #[error("token is empty")]
    TokenMissing,
    #[error("presented token is not the session's current token")]
    TokenMismatch,
    #[error("{kind} version {version} does not exist")]
    KeyVersionMissing { kind: KeyKind, version: u32 },
    #[error("public key could not be decoded")]
    PemDecode,
    #[error("token signature invalid")]
    SignatureInvalid,
    #[error("token expired")]
    TokenExpired,
    #[error("path outside the allowed audience")]
    Unauthorized,
    #[error(transparent)]
    Key(#[from] KeyError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Credential(#[from] CredentialError),
    #[error("token signing failed: {0}")]
    Signing(token::Error),
    #[error("background task failed: {0}")]
    Task(String),
}

impl SessionError {
    #[must_use]
    pub fn class(&self) -> ErrorClass {
        match self {
            Self::InvalidRequest(_) => ErrorClass::BadRequest,
            Self::AccountNotFound | Self::NoSessionForAccount => ErrorClass::NotFound,
            Self::InvalidCredentials
            | Self::InvalidRefreshToken
            | Self::RefreshExpired
            | Self::TokenMissing
            | Self::TokenMismatch
            | Self::KeyVersionMissing { .. }
            | Self::PemDecode
            | Self::SignatureInvalid
            | Self::TokenExpired
            | Self::Unauthorized => ErrorClass::Unauthorized,
            Self::Key(_)
            | Self::Store(_)
            | Self::Credential(_)
            | Self::Signing(_)
            | Self::Task(_) => ErrorClass::Internal,
        }
    }

    /// Map a verification failure of the stored token.
    pub(crate) fn from_verify(err: token::Error) -> Self {
        match err {
            token::Error::KeyDecode => Self::PemDecode,
            token::Error::Expired => Self::TokenExpired,
            _ => Self::SignatureInvalid,
        }
    }
}
