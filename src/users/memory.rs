//! In-process `UserStore`, used for local runs without Postgres and by the
//! test suite. Mirrors the Postgres constraints: live emails are unique and
//! soft-deleted rows stay in place.
use std::collections::HashMap;

use async_trait::async_trait;
use time::OffsetDateTime;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::users::{
    repo::{StoreError, UserStore},
    repo_types::{Account, ListParams, NewAccount},
};

#[derive(Default)]
pub struct MemoryUserStore {
    rows: RwLock<HashMap<Uuid, Account>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }
}

fn email_taken(rows: &HashMap<Uuid, Account>, email: &str, except: Uuid) -> bool {
    rows.values()
        .any(|a| a.id != except && !a.is_deleted() && a.email == email)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_id(
        &self,
        id: Uuid,
        include_deleted: bool,
    ) -> Result<Option<Account>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .get(&id)
            .filter(|a| include_deleted || !a.is_deleted())
            .cloned())
    }

    async fn find_by_email(&self, email: &str) -> Result<Option<Account>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|a| !a.is_deleted() && a.email == email)
            .cloned())
    }

    async fn find_by_reset_digest(
        &self,
        digest: &str,
        now: OffsetDateTime,
    ) -> Result<Option<Account>, StoreError> {
        let rows = self.rows.read().await;
        Ok(rows
            .values()
            .find(|a| {
                !a.is_deleted()
                    && a.reset_token_digest.as_deref() == Some(digest)
                    && a.reset_token_expires_at.is_some_and(|exp| exp > now)
            })
            .cloned())
    }

    async fn list(&self, params: ListParams) -> Result<Vec<Account>, StoreError> {
        let rows = self.rows.read().await;
        let mut all: Vec<Account> = rows
            .values()
            .filter(|a| params.include_deleted || !a.is_deleted())
            .cloned()
            .collect();
        all.sort_by_key(|a| a.created_at);
        Ok(all
            .into_iter()
            .skip(params.offset.max(0) as usize)
            .take(params.limit.max(0) as usize)
            .collect())
    }

    async fn create(&self, new: NewAccount) -> Result<Account, StoreError> {
        let mut rows = self.rows.write().await;
        if email_taken(&rows, &new.email, Uuid::nil()) {
            return Err(StoreError::Conflict);
        }
        let now = OffsetDateTime::now_utc();
        let account = Account {
            id: Uuid::new_v4(),
            email: new.email,
            name: new.name,
            role: new.role,
            is_active: true,
            password_hash: new.password_hash,
            password_changed_at: None,
            reset_token_digest: None,
            reset_token_expires_at: None,
            last_login_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        };
        rows.insert(account.id, account.clone());
        Ok(account)
    }

    async fn save(&self, account: &Account) -> Result<Account, StoreError> {
        let mut rows = self.rows.write().await;
        if !rows.contains_key(&account.id) {
            return Err(StoreError::NotFound);
        }
        if email_taken(&rows, &account.email, account.id) {
            return Err(StoreError::Conflict);
        }
        let Some(row) = rows.get_mut(&account.id) else {
            return Err(StoreError::NotFound);
        };
        // deleted_at and created_at are owned by the store
        row.email = account.email.clone();
        row.name = account.name.clone();
        row.role = account.role;
        row.is_active = account.is_active;
        row.password_hash = account.password_hash.clone();
        row.password_changed_at = account.password_changed_at;
        row.reset_token_digest = account.reset_token_digest.clone();
        row.reset_token_expires_at = account.reset_token_expires_at;
        row.last_login_at = account.last_login_at;
        row.updated_at = OffsetDateTime::now_utc();
        Ok(row.clone())
    }

    async fn soft_delete(&self, id: Uuid) -> Result<(), StoreError> {
        let mut rows = self.rows.write().await;
        match rows.get_mut(&id) {
            Some(row) if !row.is_deleted() => {
                let now = OffsetDateTime::now_utc();
                row.deleted_at = Some(now);
                row.updated_at = now;
                Ok(())
            }
            _ => Err(StoreError::NotFound),
        }
    }

    async fn restore(&self, id: Uuid) -> Result<Account, StoreError> {
        let mut rows = self.rows.write().await;
        let email = match rows.get(&id) {
            Some(row) if row.is_deleted() => row.email.clone(),
            _ => return Err(StoreError::NotFound),
        };
        if email_taken(&rows, &email, id) {
            return Err(StoreError::Conflict);
        }
        let Some(row) = rows.get_mut(&id) else {
            return Err(StoreError::NotFound);
        };
        row.deleted_at = None;
        row.updated_at = OffsetDateTime::now_utc();
        Ok(row.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::users::repo_types::Role;
    use time::Duration;

    fn new_account(email: &str) -> NewAccount {
        NewAccount {
            email: email.into(),
            name: None,
            password_hash: "$argon2id$stub".into(),
            role: Role::User,
        }
    }

    #[tokio::test]
    async fn create_rejects_duplicate_live_email() {
        let store = MemoryUserStore::new();
        store.create(new_account("a@x.com")).await.unwrap();
        let err = store.create(new_account("a@x.com")).await.unwrap_err();
        assert!(matches!(err, StoreError::Conflict));
    }

    #[tokio::test]
    async fn soft_delete_hides_until_restore() {
        let store = MemoryUserStore::new();
        let acc = store.create(new_account("a@x.com")).await.unwrap();

        store.soft_delete(acc.id).await.unwrap();
        assert!(store.find_by_id(acc.id, false).await.unwrap().is_none());
        assert!(store.find_by_email("a@x.com").await.unwrap().is_none());
        let hidden = store.find_by_id(acc.id, true).await.unwrap().unwrap();
        assert!(hidden.is_deleted());

        // deleting twice is a miss
        assert!(matches!(
            store.soft_delete(acc.id).await.unwrap_err(),
            StoreError::NotFound
        ));

        let restored = store.restore(acc.id).await.unwrap();
        assert!(!restored.is_deleted());
        assert!(store.find_by_email("a@x.com").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn restore_conflicts_when_email_was_reused() {
        let store = MemoryUserStore::new();
        let old = store.create(new_account("a@x.com")).await.unwrap();
        store.soft_delete(old.id).await.unwrap();
        store.create(new_account("a@x.com")).await.unwrap();

        assert!(matches!(
            store.restore(old.id).await.unwrap_err(),
            StoreError::Conflict
        ));
    }

    #[tokio::test]
    async fn reset_digest_lookup_respects_expiry() {
        let store = MemoryUserStore::new();
        let mut acc = store.create(new_account("a@x.com")).await.unwrap();
        let now = OffsetDateTime::now_utc();
        acc.set_reset_token("abc".into(), now + Duration::minutes(10));
        store.save(&acc).await.unwrap();

        assert!(store.find_by_reset_digest("abc", now).await.unwrap().is_some());
        assert!(store.find_by_reset_digest("other", now).await.unwrap().is_none());
        let later = now + Duration::minutes(11);
        assert!(store.find_by_reset_digest("abc", later).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn list_paginates_and_filters_deleted() {
        let store = MemoryUserStore::new();
        let a = store.create(new_account("a@x.com")).await.unwrap();
        store.create(new_account("b@x.com")).await.unwrap();
        store.create(new_account("c@x.com")).await.unwrap();
        store.soft_delete(a.id).await.unwrap();

        let live = store
            .list(ListParams { limit: 10, offset: 0, include_deleted: false })
            .await
            .unwrap();
        assert_eq!(live.len(), 2);

        let all = store
            .list(ListParams { limit: 10, offset: 0, include_deleted: true })
            .await
            .unwrap();
        assert_eq!(all.len(), 3);

        let page = store
            .list(ListParams { limit: 1, offset: 1, include_deleted: true })
            .await
            .unwrap();
        assert_eq!(page.len(), 1);
    }
}
