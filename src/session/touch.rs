use crate::store::SessionStore;
use chrono::{DateTime, Utc};
use std::{sync::Arc, time::Duration};
use tokio::{
    sync::mpsc::{self, error::TrySendError},
    task::JoinHandle,
    time::timeout,
};
use tracing::{debug, error, warn};
use uuid::Uuid;

/// A pending `last_login_at` update.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Touch {
    pub account_id: Uuid,
    pub device_id: String,
    pub at: DateTime<Utc>,
}

/// Sender half of the background last-login queue.
///
/// Touches are best effort: a full queue drops the update with a warning and
/// the request path never waits on the store.
#[derive(Clone, Debug)]
pub struct TouchQueue {
    tx: mpsc::Sender<Touch>,
}

impl TouchQueue {
    /// Spawn the worker that drains the queue, each write bounded by `deadline`.
    pub fn spawn(
        store: Arc<dyn SessionStore>,
        capacity: usize,
        deadline: Duration,
    ) -> (Self, JoinHandle<()>) {
        let (tx, mut rx) = mpsc::channel::<Touch>(capacity.max(1));

        let handle = tokio::spawn(async move {
            while let Some(touch) = rx.recv().await {
                apply(store.as_ref(), &touch, deadline).await;
            }
            debug!("touch queue closed");
        });

        (Self { tx }, handle)
    }

    pub fn enqueue(&self, touch: Touch) {
        match self.tx.try_send(touch) {
            Ok(()) => {}
            Err(TrySendError::Full(touch)) => {
                warn!(
                    account_id = %touch.account_id,
                    device_id = %touch.device_id,
                    "touch queue full, dropping last-login update"
                );
            }
            Err(TrySendError::Closed(touch)) => {
                warn!(
                    account_id = %touch.account_id,
                    device_id = %touch.device_id,
                    "touch worker stopped, dropping last-login update"
                );
            }
        }
    }
}

async fn apply(store: &dyn SessionStore, touch: &Touch, deadline: Duration) {
    match timeout(
        deadline,
        store.touch_session(touch.account_id, &touch.device_id, touch.at),
    )
    .await
    {
        Ok(Ok(())) => debug!(device_id = %touch.device_id, "last-login updated"),
        Ok(Err(err)) => error!(
            account_id = %touch.account_id,
            device_id = %touch.device_id,
            "Failed to update last-login: {err}"
        ),
        Err(_) => error!(
            account_id = %touch.account_id,
            device_id = %touch.device_id,
            "last-login update timed out after {}ms",
            deadline.as_millis()
        ),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::account::{Account, EncryptionVersions, Session, SessionGrant};
    use crate::store::{AccountStamp, MemoryStore, StoreError};
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Hangs on the first touch, records every later one.
    #[derive(Default)]
    struct StalledStore {
        calls: Mutex<usize>,
        applied: Mutex<Vec<String>>,
    }

    impl StalledStore {
        fn applied(&self) -> Vec<String> {
            self.applied.lock().map(|a| a.clone()).unwrap_or_default()
        }
    }

    #[async_trait]
    impl SessionStore for StalledStore {
        async fn find_account(&self, _identity: &str) -> Result<Option<Account>, StoreError> {
            Ok(None)
        }

        async fn insert_account(&self, _account: &Account) -> Result<(), StoreError> {
            Ok(())
        }

        async fn delete_account(&self, _account_id: Uuid) -> Result<bool, StoreError> {
            Ok(false)
        }

        async fn save_session(
            &self,
            _account_id: Uuid,
            _session: &Session,
            _stamp: AccountStamp,
        ) -> Result<(), StoreError> {
            Ok(())
        }

        async fn touch_session(
            &self,
            _account_id: Uuid,
            device_id: &str,
            _at: DateTime<Utc>,
        ) -> Result<(), StoreError> {
            let first = {
                let mut calls = self
                    .calls
                    .lock()
                    .map_err(|err| StoreError::Unavailable(err.to_string()))?;
                *calls += 1;
                *calls == 1
            };
            if first {
                std::future::pending::<()>().await;
            }
            if let Ok(mut applied) = self.applied.lock() {
                applied.push(device_id.to_string());
            }
            Ok(())
        }

        async fn ping(&self) -> Result<(), StoreError> {
            Ok(())
        }
    }

    #[tokio::test]
    async fn worker_applies_touches() -> Result<(), StoreError> {
        let store = Arc::new(MemoryStore::new());
        let mut account = Account::new("u@x.com", "h");
        store.insert_account(&account).await?;

        let issued = Utc::now() - chrono::Duration::hours(1);
        let session = account
            .upsert(
                "D1",
                SessionGrant {
                    token: "t".to_string(),
                    token_id: "i".to_string(),
                    issued_at: issued,
                    refresh_token: "r".to_string(),
                    refresh_issued_at: issued,
                    ip_address: None,
                    encryption_versions: EncryptionVersions {
                        asymmetric: 1,
                        symmetric: 1,
                    },
                },
            )
            .clone();
        store
            .save_session(account.account_id, &session, AccountStamp::Unchanged)
            .await?;

        let (queue, handle) = TouchQueue::spawn(store.clone(), 4, Duration::from_secs(1));
        let at = Utc::now();
        queue.enqueue(Touch {
            account_id: account.account_id,
            device_id: "D1".to_string(),
            at,
        });
        drop(queue);
        let _ = handle.await;

        let loaded = store.find_account("u@x.com").await?;
        let last_login_at = loaded
            .as_ref()
            .and_then(|a| a.find_by_device("D1"))
            .and_then(|s| s.last_login_at);
        assert_eq!(last_login_at, Some(at));
        Ok(())
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_write_gives_up_after_deadline() {
        let store = Arc::new(StalledStore::default());
        let deadline = Duration::from_secs(5);

        let (queue, handle) = TouchQueue::spawn(store.clone(), 4, deadline);
        let started = tokio::time::Instant::now();
        for device_id in ["stuck", "D2"] {
            queue.enqueue(Touch {
                account_id: Uuid::new_v4(),
                device_id: device_id.to_string(),
                at: Utc::now(),
            });
        }
        drop(queue);

        // the worker abandons the first write and still drains the second
        assert!(handle.await.is_ok());
        assert!(started.elapsed() >= deadline);
        assert_eq!(store.applied(), ["D2".to_string()]);
    }

    #[tokio::test]
    async fn store_failures_are_swallowed() {
        let store = Arc::new(MemoryStore::new());
        store.set_unavailable(true);

        let (queue, handle) = TouchQueue::spawn(store, 1, Duration::from_millis(50));
        queue.enqueue(Touch {
            account_id: Uuid::new_v4(),
            device_id: "D1".to_string(),
            at: Utc::now(),
        });
        drop(queue);

        // the worker logs and keeps draining until the queue closes
        assert!(handle.await.is_ok());
    }
}
