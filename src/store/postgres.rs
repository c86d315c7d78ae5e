use super::{AccountStamp, SessionStore, StoreError};
use crate::account::{normalize_identity, Account, EncryptionVersions, Session};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::{info_span, instrument, Instrument};
use uuid::Uuid;

const SELECT_ACCOUNT: &str = r"
    SELECT account_id, identity, is_verified, is_complete, two_fa_enabled,
           password_hash, last_login, last_logout
    FROM accounts
    WHERE lower(identity) = $1
";

const SELECT_SESSIONS: &str = r"
    SELECT device_id, token, token_id, issued_at, last_login_at, refresh_token,
           refresh_issued_at, active, ip_address, asymmetric_version, symmetric_version
    FROM sessions
    WHERE account_id = $1
    ORDER BY created_at, device_id
";

const UPSERT_SESSION: &str = r"
    INSERT INTO sessions (account_id, device_id, token, token_id, issued_at, last_login_at,
                          refresh_token, refresh_issued_at, active, ip_address,
                          asymmetric_version, symmetric_version)
    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
    ON CONFLICT (account_id, device_id) DO UPDATE SET
        token = EXCLUDED.token,
        token_id = EXCLUDED.token_id,
        issued_at = EXCLUDED.issued_at,
        last_login_at = EXCLUDED.last_login_at,
        refresh_token = EXCLUDED.refresh_token,
        refresh_issued_at = EXCLUDED.refresh_issued_at,
        active = EXCLUDED.active,
        ip_address = EXCLUDED.ip_address,
        asymmetric_version = EXCLUDED.asymmetric_version,
        symmetric_version = EXCLUDED.symmetric_version
";

fn db_span(operation: &'static str, statement: &'static str) -> tracing::Span {
    info_span!(
        "db.query",
        db.system = "postgresql",
        db.operation = operation,
        db.statement = statement
    )
}

fn version_from_db(value: i64) -> Result<u32, StoreError> {
    u32::try_from(value).map_err(|_| StoreError::Corrupt(format!("key version {value}")))
}

fn session_from_row(row: &PgRow) -> Result<Session, StoreError> {
    let asymmetric: Option<i64> = row.try_get("asymmetric_version")?;
    let symmetric: Option<i64> = row.try_get("symmetric_version")?;

    let encryption_versions = match (asymmetric, symmetric) {
        (Some(asymmetric), Some(symmetric)) => Some(EncryptionVersions {
            asymmetric: version_from_db(asymmetric)?,
            symmetric: version_from_db(symmetric)?,
        }),
        _ => None,
    };

    Ok(Session {
        device_id: row.try_get("device_id")?,
        token: row.try_get("token")?,
        token_id: row.try_get("token_id")?,
        issued_at: row.try_get("issued_at")?,
        last_login_at: row.try_get("last_login_at")?,
        refresh_token: row.try_get("refresh_token")?,
        refresh_issued_at: row.try_get("refresh_issued_at")?,
        active: row.try_get("active")?,
        ip_address: row.try_get("ip_address")?,
        encryption_versions,
    })
}

/// PostgreSQL-backed store, see `sql/schema.sql`.
#[derive(Clone, Debug)]
pub struct PgSessionStore {
    pool: PgPool,
}

impl PgSessionStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl SessionStore for PgSessionStore {
    #[instrument(skip(self))]
    async fn find_account(&self, identity: &str) -> Result<Option<Account>, StoreError> {
        let Some(row) = sqlx::query(SELECT_ACCOUNT)
            .bind(normalize_identity(identity))
            .fetch_optional(&self.pool)
            .instrument(db_span("SELECT", SELECT_ACCOUNT))
            .await?
        else {
            return Ok(None);
        };

        let account_id: Uuid = row.try_get("account_id")?;

        let rows = sqlx::query(SELECT_SESSIONS)
            .bind(account_id)
            .fetch_all(&self.pool)
            .instrument(db_span("SELECT", SELECT_SESSIONS))
            .await?;

        let sessions = rows
            .iter()
            .map(session_from_row)
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Some(Account {
            account_id,
            identity: row.try_get("identity")?,
            is_verified: row.try_get("is_verified")?,
            is_complete: row.try_get("is_complete")?,
            two_fa_enabled: row.try_get("two_fa_enabled")?,
            password_hash: row.try_get("password_hash")?,
            sessions,
            last_login: row.try_get("last_login")?,
            last_logout: row.try_get("last_logout")?,
        }))
    }

    #[instrument(skip(self, account), fields(account_id = %account.account_id))]
    async fn insert_account(&self, account: &Account) -> Result<(), StoreError> {
        let query = r"
            INSERT INTO accounts (account_id, identity, is_verified, is_complete, two_fa_enabled,
                                  password_hash, last_login, last_logout)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ";

        let result = sqlx::query(query)
            .bind(account.account_id)
            .bind(&account.identity)
            .bind(account.is_verified)
            .bind(account.is_complete)
            .bind(account.two_fa_enabled)
            .bind(&account.password_hash)
            .bind(account.last_login)
            .bind(account.last_logout)
            .execute(&self.pool)
            .instrument(db_span("INSERT", query))
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(err)) if err.is_unique_violation() => {
                Err(StoreError::DuplicateAccount(account.identity.clone()))
            }
            Err(err) => Err(err.into()),
        }
    }

    #[instrument(skip(self))]
    async fn delete_account(&self, account_id: Uuid) -> Result<bool, StoreError> {
        let query = "DELETE FROM accounts WHERE account_id = $1";

        let result = sqlx::query(query)
            .bind(account_id)
            .execute(&self.pool)
            .instrument(db_span("DELETE", query))
            .await?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self, session), fields(device_id = %session.device_id))]
    async fn save_session(
        &self,
        account_id: Uuid,
        session: &Session,
        stamp: AccountStamp,
    ) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;

        // the account row lock orders concurrent writers for one account
        let stamp_query = match stamp {
            AccountStamp::Login(_) => {
                "UPDATE accounts SET last_login = $2 WHERE account_id = $1 RETURNING account_id"
            }
            AccountStamp::Logout(_) => {
                "UPDATE accounts SET last_logout = $2 WHERE account_id = $1 RETURNING account_id"
            }
            AccountStamp::Unchanged => {
                "SELECT account_id, $2::timestamptz FROM accounts WHERE account_id = $1 FOR UPDATE"
            }
        };
        let stamp_at: Option<DateTime<Utc>> = match stamp {
            AccountStamp::Login(at) | AccountStamp::Logout(at) => Some(at),
            AccountStamp::Unchanged => None,
        };

        let locked = sqlx::query(stamp_query)
            .bind(account_id)
            .bind(stamp_at)
            .fetch_optional(&mut *tx)
            .instrument(db_span("UPDATE", stamp_query))
            .await?;

        if locked.is_none() {
            return Err(StoreError::MissingAccount(account_id));
        }

        let versions = session.encryption_versions;

        sqlx::query(UPSERT_SESSION)
            .bind(account_id)
            .bind(&session.device_id)
            .bind(&session.token)
            .bind(&session.token_id)
            .bind(session.issued_at)
            .bind(session.last_login_at)
            .bind(&session.refresh_token)
            .bind(session.refresh_issued_at)
            .bind(session.active)
            .bind(&session.ip_address)
            .bind(versions.map(|v| i64::from(v.asymmetric)))
            .bind(versions.map(|v| i64::from(v.symmetric)))
            .execute(&mut *tx)
            .instrument(db_span("INSERT", UPSERT_SESSION))
            .await?;

        tx.commit().await?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn touch_session(
        &self,
        account_id: Uuid,
        device_id: &str,
        at: DateTime<Utc>,
    ) -> Result<(), StoreError> {
        let query = "UPDATE sessions SET last_login_at = $3 WHERE account_id = $1 AND device_id = $2";

        sqlx::query(query)
            .bind(account_id)
            .bind(device_id)
            .bind(at)
            .execute(&self.pool)
            .instrument(db_span("UPDATE", query))
            .await?;

        Ok(())
    }

    async fn ping(&self) -> Result<(), StoreError> {
        let query = "SELECT 1";

        sqlx::query(query)
            .execute(&self.pool)
            .instrument(db_span("SELECT", query))
            .await?;

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn versions_outside_u32_are_corrupt() {
        assert_eq!(version_from_db(7).ok(), Some(7));
        assert!(matches!(version_from_db(-1), Err(StoreError::Corrupt(_))));
        assert!(matches!(
            version_from_db(i64::from(u32::MAX) + 1),
            Err(StoreError::Corrupt(_))
        ));
    }

    #[test]
    fn upsert_targets_the_device_key() {
        assert!(UPSERT_SESSION.contains("ON CONFLICT (account_id, device_id)"));
        assert!(SELECT_ACCOUNT.contains("lower(identity)"));
    }
}
