use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "lowercase")]
#[sqlx(type_name = "user_role", rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Account record in the database. Credential columns are skipped by serde
/// so the record can never leak them; handlers respond with `PublicUser`.
#[derive(Debug, Clone, FromRow, Serialize)]
pub struct Account {
    pub id: Uuid,
    pub email: String,
    pub name: Option<String>,
    pub role: Role,
    pub is_active: bool,
    #[serde(skip_serializing)]
    pub password_hash: String, // Argon2 PHC string
    pub password_changed_at: Option<OffsetDateTime>,
    #[serde(skip_serializing)]
    pub reset_token_digest: Option<String>,
    #[serde(skip_serializing)]
    pub reset_token_expires_at: Option<OffsetDateTime>,
    pub last_login_at: Option<OffsetDateTime>,
    pub deleted_at: Option<OffsetDateTime>,
    pub created_at: OffsetDateTime,
    pub updated_at: OffsetDateTime,
}

impl Account {
    /// Replace the credential. Every password change moves
    /// `password_changed_at`, which invalidates older bearer tokens.
    ///
    /// Token issue times are whole seconds, so the change time is rounded up
    /// to the next second: every token issued before `now` is then strictly
    /// older. Returns the stored time; fresh tokens must be issued at it.
    pub fn set_password(&mut self, password_hash: String, now: OffsetDateTime) -> OffsetDateTime {
        let changed_at = ceil_to_second(now);
        self.password_hash = password_hash;
        self.password_changed_at = Some(changed_at);
        changed_at
    }

    /// Digest and expiry are always written together.
    pub fn set_reset_token(&mut self, digest: String, expires_at: OffsetDateTime) {
        self.reset_token_digest = Some(digest);
        self.reset_token_expires_at = Some(expires_at);
    }

    pub fn clear_reset_token(&mut self) {
        self.reset_token_digest = None;
        self.reset_token_expires_at = None;
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// True when a token issued at `issued_at` (unix seconds) predates the
    /// last credential change.
    pub fn changed_password_after(&self, issued_at: i64) -> bool {
        self.password_changed_at
            .map(|changed| issued_at < changed.unix_timestamp())
            .unwrap_or(false)
    }
}

fn ceil_to_second(t: OffsetDateTime) -> OffsetDateTime {
    let floor = t - Duration::nanoseconds(i64::from(t.nanosecond()));
    if floor == t {
        t
    } else {
        floor + Duration::SECOND
    }
}

/// Fields needed to insert a new account. The email must already be
/// normalized and the password hashed.
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub email: String,
    pub name: Option<String>,
    pub password_hash: String,
    pub role: Role,
}

#[derive(Debug, Clone, Copy)]
pub struct ListParams {
    pub limit: i64,
    pub offset: i64,
    pub include_deleted: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn account() -> Account {
        let now = OffsetDateTime::now_utc();
        Account {
            id: Uuid::new_v4(),
            email: "a@x.com".into(),
            name: None,
            role: Role::User,
            is_active: true,
            password_hash: "$argon2id$stub".into(),
            password_changed_at: None,
            reset_token_digest: None,
            reset_token_expires_at: None,
            last_login_at: None,
            deleted_at: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn serialized_account_has_no_credentials() {
        let mut acc = account();
        acc.set_reset_token("digest".into(), OffsetDateTime::now_utc());
        let json = serde_json::to_value(&acc).unwrap();
        assert!(json.get("password_hash").is_none());
        assert!(json.get("reset_token_digest").is_none());
        assert!(json.get("reset_token_expires_at").is_none());
        assert_eq!(json["role"], "user");
    }

    #[test]
    fn reset_fields_move_together() {
        let mut acc = account();
        acc.set_reset_token("d".into(), OffsetDateTime::now_utc());
        assert!(acc.reset_token_digest.is_some() && acc.reset_token_expires_at.is_some());
        acc.clear_reset_token();
        assert!(acc.reset_token_digest.is_none() && acc.reset_token_expires_at.is_none());
    }

    #[test]
    fn token_older_than_password_change_is_stale() {
        let mut acc = account();
        let now = OffsetDateTime::now_utc();
        assert!(!acc.changed_password_after(now.unix_timestamp()));

        let changed = acc.set_password("$argon2id$other".into(), now);
        let before = (now - Duration::minutes(5)).unix_timestamp();
        assert!(acc.changed_password_after(before));
        assert!(!acc.changed_password_after(changed.unix_timestamp()));
    }

    #[test]
    fn change_time_rounds_up_to_whole_second() {
        let now = OffsetDateTime::now_utc();
        let second = now - Duration::nanoseconds(i64::from(now.nanosecond()));

        let mut acc = account();
        let changed = acc.set_password("h".into(), second + Duration::milliseconds(600));
        assert_eq!(changed, second + Duration::SECOND);
        assert_eq!(acc.password_changed_at, Some(changed));

        // issued 500ms earlier, inside the same second
        let earlier = second + Duration::milliseconds(100);
        assert!(acc.changed_password_after(earlier.unix_timestamp()));

        assert_eq!(acc.set_password("h".into(), second), second);
    }
}
