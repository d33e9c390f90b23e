use async_trait::async_trait;
use sqlx::PgPool;
use thiserror::Error;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::users::repo_types::{Account, ListParams, NewAccount};

#[derive(Debug, Error)]
pub enum StoreError {
    /// Another live account already owns the email.
    #[error("email already in use")]
    Conflict,
    #[error("account not found")]
    NotFound,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match e {
            sqlx::Error::RowNotFound => StoreError::NotFound,
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::Conflict,
            other => StoreError::Backend(other.into()),
        }
    }
}

/// Durable account records. Each call touches a single row, and the backend
/// guarantees that row is updated atomically; nothing spans several rows.
#[async_trait]
pub trait UserStore: Send + Sync {
    /// Soft-deleted rows are only returned with `include_deleted`.
    async fn find_by_id(&self, id: Uuid, include_deleted: bool)
        -> Result<Option<Account>, StoreError>;

    /// `email` must already be lowercased.
    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError>;

    /// Live account holding `digest` whose reset window is still open at `now`.
    async fn find_by_reset_digest(
        &self,
        digest: &str,
        now: OffsetDateTime,
    ) -> Result<Option<Account>, StoreError>;

    async fn list(&self, params: ListParams) -> Result<Vec<Account>, StoreError>;

    async fn create(&self, new: NewAccount) -> Result<Account, StoreError>;

    /// Writes every mutable column of `account` and bumps `updated_at`.
    async fn save(&self, account: &Account) -> Result<Account, StoreError>;

    async fn soft_delete(&self, id: Uuid) -> Result<(), StoreError>;

    async fn restore(&self, id: Uuid) -> Result<Account, StoreError>;
}

const ACCOUNT_COLUMNS: &str = "id, email, name, role, is_active, password_hash, \
     password_changed_at, reset_token_digest, reset_token_expires_at, last_login_at, \
     deleted_at, created_at, updated_at";

#[derive(Clone)]
pub struct PgUserStore {
    db: PgPool,
}

impl PgUserStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl UserStore for PgUserStore {
    async fn find_by_id(
        &self,
        id: Uuid,
        include_deleted: bool,
    ) -> Result<Option<Account>, StoreError> {
        let user = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM users WHERE id = $1 AND ($2 OR deleted_at IS NULL)"
        ))
        .bind(id)
        .bind(include_deleted)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let user = sqlx::query_as::<_, Account>(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM users WHERE email = $1 AND deleted_at IS NULL"
        ))
        .bind(email)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn find_by_reset_digest(
        &self,
        digest: &str,
        now: OffsetDateTime,
    ) -> Result<Option<Account>, StoreError> {
        let user = sqlx::query_as::<_, Account>(&format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}
              FROM users
             WHERE reset_token_digest = $1
               AND reset_token_expires_at > $2
               AND deleted_at IS NULL
            "#
        ))
        .bind(digest)
        .bind(now)
        .fetch_optional(&self.db)
        .await?;
        Ok(user)
    }

    async fn list(&self, params: ListParams) -> Result<Vec<Account>, StoreError> {
        let rows = sqlx::query_as::<_, Account>(&format!(
            r#"
            SELECT {ACCOUNT_COLUMNS}
              FROM users
             WHERE ($1 OR deleted_at IS NULL)
             ORDER BY created_at ASC
             LIMIT $2 OFFSET $3
            "#
        ))
        .bind(params.include_deleted)
        .bind(params.limit)
        .bind(params.offset)
        .fetch_all(&self.db)
        .await?;
        Ok(rows)
    }

    async fn create(&self, new: NewAccount) -> Result<Account, StoreError> {
        let user = sqlx::query_as::<_, Account>(&format!(
            r#"
            INSERT INTO users (email, name, password_hash, role)
            VALUES ($1, $2, $3, $4)
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(&new.email)
        .bind(&new.name)
        .bind(&new.password_hash)
        .bind(new.role)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn save(&self, account: &Account) -> Result<Account, StoreError> {
        let user = sqlx::query_as::<_, Account>(&format!(
            r#"
            UPDATE users
               SET email = $2,
                   name = $3,
                   role = $4,
                   is_active = $5,
                   password_hash = $6,
                   password_changed_at = $7,
                   reset_token_digest = $8,
                   reset_token_expires_at = $9,
                   last_login_at = $10,
                   updated_at = now()
             WHERE id = $1
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(account.id)
        .bind(&account.email)
        .bind(&account.name)
        .bind(account.role)
        .bind(account.is_active)
        .bind(&account.password_hash)
        .bind(account.password_changed_at)
        .bind(&account.reset_token_digest)
        .bind(account.reset_token_expires_at)
        .bind(account.last_login_at)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }

    async fn soft_delete(&self, id: Uuid) -> Result<(), StoreError> {
        let res = sqlx::query(
            "UPDATE users SET deleted_at = now(), updated_at = now() \
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(&self.db)
        .await?;
        if res.rows_affected() == 0 {
            return Err(StoreError::NotFound);
        }
        Ok(())
    }

    async fn restore(&self, id: Uuid) -> Result<Account, StoreError> {
        let user = sqlx::query_as::<_, Account>(&format!(
            r#"
            UPDATE users
               SET deleted_at = NULL, updated_at = now()
             WHERE id = $1 AND deleted_at IS NOT NULL
            RETURNING {ACCOUNT_COLUMNS}
            "#
        ))
        .bind(id)
        .fetch_one(&self.db)
        .await?;
        Ok(user)
    }
}
