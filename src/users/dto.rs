use serde::Deserialize;

use crate::users::repo_types::{ListParams, Role};

#[derive(Debug, Deserialize)]
pub struct Pagination {
    #[serde(default = "default_limit")]
    pub limit: i64,
    #[serde(default)]
    pub offset: i64,
    #[serde(default)]
    pub include_deleted: bool,
}
fn default_limit() -> i64 {
    20
}

impl From<Pagination> for ListParams {
    fn from(p: Pagination) -> Self {
        Self {
            limit: p.limit.clamp(1, 100),
            offset: p.offset.max(0),
            include_deleted: p.include_deleted,
        }
    }
}

#[derive(Debug, Default, Deserialize)]
pub struct LookupQuery {
    #[serde(default)]
    pub include_deleted: bool,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CreateUserRequest {
    pub email: String,
    pub password: String,
    #[serde(default)]
    pub password_confirm: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
}

/// Admin edit. Passwords only change through the owner's own flows.
#[derive(Debug, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct UpdateUserRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub role: Option<Role>,
    #[serde(default, deserialize_with = "crate::auth::dto::key_present")]
    pub password: bool,
    #[serde(default, deserialize_with = "crate::auth::dto::key_present")]
    pub password_confirm: bool,
}
