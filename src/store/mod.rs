//! Session Store.
//!
//! Accounts are read whole (with their sessions, in creation order); writes
//! are per session, keyed by `(account_id, device_id)`, and carry the
//! account-level stamp that goes with them in the same transaction.

mod memory;
mod postgres;

pub use memory::MemoryStore;
pub use postgres::PgSessionStore;

use crate::account::{Account, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("store unavailable: {0}")]
    Unavailable(String),
    #[error("account {0} does not exist")]
    MissingAccount(Uuid),
    #[error("account {0} already exists")]
    DuplicateAccount(String),
    #[error("corrupt row: {0}")]
    Corrupt(String),
    #[error(transparent)]
    Database(#[from] sqlx::Error),
}

/// Account-level timestamp written alongside a session change.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AccountStamp {
    Login(DateTime<Utc>),
    Logout(DateTime<Utc>),
    Unchanged,
}

#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Load an account and its sessions by (case-insensitive) identity.
    async fn find_account(&self, identity: &str) -> Result<Option<Account>, StoreError>;

    async fn insert_account(&self, account: &Account) -> Result<(), StoreError>;

    /// Returns `false` when no such account existed.
    async fn delete_account(&self, account_id: Uuid) -> Result<bool, StoreError>;

    /// Atomically upsert one session row and apply `stamp` to its account.
    async fn save_session(
        &self,
        account_id: Uuid,
        session: &Session,
        stamp: AccountStamp,
    ) -> Result<(), StoreError>;

    /// Set `last_login_at` on one session. Missing sessions are ignored.
    async fn touch_session(
        &self,
        account_id: Uuid,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError>;

    async fn ping(&self) -> Result<(), StoreError>;
}
