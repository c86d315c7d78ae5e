use super::{AccountStamp, SessionStore, StoreError};
use crate::account::{normalize_identity, Account, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;
use uuid::Uuid;

/// In-process store with the same per-session upsert semantics as Postgres.
#[derive(Debug, Default)]
pub struct MemoryStore {
    accounts: RwLock<HashMap<Uuid, Account>>,
    unavailable: AtomicBool,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every call fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), StoreError> {
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("memory store offline".to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn find_account(&self, identity: &str) -> Result<Option<Account>, StoreError> {
        self.check()?;
        let identity = normalize_identity(identity);
        let accounts = self.accounts.read().await;
        Ok(accounts
            .values()
            .find(|account| account.identity == identity)
            .cloned())
    }

    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        self.check()?;
        let mut accounts = self.accounts.write().await;
        let identity = normalize_identity(&account.identity);
        if accounts
            .values()
            .any(|existing| existing.identity == identity)
        {
            return Err(StoreError::DuplicateAccount(identity));
        }
        let mut account = account.clone();
        account.identity = identity;
        accounts.insert(account.account_id, account);
        Ok(())
    }

    async fn delete_account(&self, account_id: Uuid) -> Result<bool, StoreError> {
        self.check()?;
        Ok(self.accounts.write().await.remove(&account_id).is_some())
    }

    async fn save_session(
        &self,
        account_id: Uuid,
        session: &Session,
        stamp: AccountStamp,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut accounts = self.accounts.write().await;
        let account = accounts
            .get_mut(&account_id)
            .ok_or(StoreError::MissingAccount(account_id))?;

        match account
            .sessions
            .iter_mut()
            .find(|s| s.device_id == session.device_id)
        {
            Some(existing) => *existing = session.clone(),
            None => account.sessions.push(session.clone()),
        }

        match stamp {
            AccountStamp::Login(at) => account.last_login = Some(at),
            AccountStamp::Logout(at) => account.last_logout = Some(at),
            AccountStamp::Unchanged => {}
        }

        Ok(())
    }

    async fn touch_session(
        &self,
        account_id: Uuid,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        self.check()?;
        let mut accounts = self.accounts.write().await;
        if let Some(session) = accounts
            .get_mut(&account_id)
            .and_then(|account| account.sessions.iter_mut().find(|s| s.device_id == device_id))
        {
            session.last_login_at = Some(at);
        }
        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        self.check()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{EncryptionVersions, SessionGrant};

    fn grant(token: &str) -> SessionGrant {
        let now = Utc::now();
        SessionGrant {
            token: token.to_string(),
            token_id: "id".to_string(),
            issued_at: now,
            refresh_token: "r".to_string(),
            refresh_issued_at: now,
            ip_address: None,
            encryption_versions: EncryptionVersions {
                asymmetric: 1,
                symmetric: 1,
            },
        }
    }

    #[tokio::test]
    async fn identity_lookup_is_case_insensitive() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        store.insert_account(&Account::new("U@x.com", "h")).await?;

        assert!(store.find_account("u@X.COM").await?.is_some());
        assert!(store.find_account("v@x.com").await?.is_none());
        assert!(matches!(
            store.insert_account(&Account::new("u@x.com", "h")).await,
            Err(StoreError::DuplicateAccount(_))
        ));
        Ok(())
    }

    #[tokio::test]
    async fn save_session_upserts_by_device_and_stamps() -> Result<(), StoreError> {
        let store = MemoryStore::new();
        let mut account = Account::new("u@x.com", "h");
        store.insert_account(&account).await?;

        let at = Utc::now();
        let first = account.upsert("D1", grant("t1")).clone();
        store
            .save_session(account.account_id, &first, AccountStamp::Login(at))
            .await?;
        let second = account.upsert("D1", grant("t2")).clone();
        store
            .save_session(account.account_id, &second, AccountStamp::Unchanged)
            .await?;

        let loaded = store.find_account("u@x.com").await?;
        let loaded = loaded.ok_or(StoreError::MissingAccount(account.account_id))?;
        assert_eq!(loaded.sessions.len(), 1);
        assert_eq!(loaded.sessions[0].token.as_deref(), Some("t2"));
        assert_eq!(loaded.last_login, Some(at));
        assert_eq!(loaded.last_logout, None);
        Ok(())
    }

    #[tokio::test]
    async fn save_session_requires_account() {
        let store = MemoryStore::new();
        let mut account = Account::new("u@x.com", "h");
        let session = account.upsert("D1", grant("t1")).clone();

        assert!(matches!(
            store
                .save_session(account.account_id, &session, AccountStamp::Unchanged)
                .await,
            Err(StoreError::MissingAccount(_))
        ));
    }

    #[tokio::test]
    async fn unavailable_store_fails_every_call() {
        let store = MemoryStore::new();
        store.set_unavailable(true);
        assert!(matches!(store.ping().await, Err(StoreError::Unavailable(_))));
        assert!(store.find_account("u@x.com").await.is_err());

        store.set_unavailable(false);
        assert!(store.ping().await.is_ok());
    }
}
