//! Request authentication.
//!
//! `authenticate` runs the gate: find a token (bearer header, then cookie),
//! verify it, load the account, then refuse deactivated accounts and tokens
//! issued before the last password change. `require_auth` attaches the
//! account to the request; `MaybeAuthUser` is the lenient form for routes
//! that also serve guests. `require_admin` is the role check and must be
//! layered inside `require_auth`.
use axum::{
    async_trait,
    extract::{FromRequestParts, Request, State},
    http::{header, request::Parts, HeaderMap},
    middleware::Next,
    response::Response,
};
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    error::AppError,
    state::AppState,
    users::{
        repo::StoreError,
        repo_types::{Account, Role},
    },
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthRejection {
    #[error("You are not logged in! Please log in to get access.")]
    NoToken,
    #[error("Invalid or expired token. Please log in again.")]
    InvalidOrExpiredToken,
    #[error("The user belonging to this token no longer exists.")]
    AccountGone,
    #[error("This account has been deactivated.")]
    Deactivated,
    #[error("User recently changed password! Please log in again.")]
    StaleSession,
}

#[derive(Debug, Error)]
pub enum GateError {
    #[error(transparent)]
    Rejected(#[from] AuthRejection),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl From<GateError> for AppError {
    fn from(e: GateError) -> Self {
        match e {
            GateError::Rejected(r) => AppError::Unauthorized(r.to_string()),
            GateError::Store(e) => e.into(),
        }
    }
}

/// Authenticated account, available to handlers behind the gate.
#[derive(Debug, Clone)]
pub struct AuthUser(pub Account);

/// `None` for guests and for any token the gate would reject.
#[derive(Debug, Clone)]
pub struct MaybeAuthUser(pub Option<Account>);

fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    value
        .strip_prefix("Bearer ")
        .or_else(|| value.strip_prefix("bearer "))
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

fn cookie_token<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .find_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            (name == cookie_name && !value.is_empty()).then_some(value)
        })
}

/// Bearer header wins over the cookie.
pub fn extract_token<'a>(headers: &'a HeaderMap, cookie_name: &str) -> Option<&'a str> {
    bearer_token(headers).or_else(|| cookie_token(headers, cookie_name))
}

pub async fn authenticate(state: &AppState, headers: &HeaderMap) -> Result<Account, GateError> {
    let token = extract_token(headers, &state.config.cookie_name).ok_or(AuthRejection::NoToken)?;

    let claims = state.keys.verify(token).map_err(|e| {
        debug!(error = %e, "token rejected");
        AuthRejection::InvalidOrExpiredToken
    })?;

    let account = state
        .users
        .find_by_id(claims.sub, false)
        .await?
        .ok_or_else(|| {
            warn!(user_id = %claims.sub, "token for missing account");
            AuthRejection::AccountGone
        })?;

    if !account.is_active {
        warn!(user_id = %account.id, "token for deactivated account");
        return Err(AuthRejection::Deactivated.into());
    }

    if account.changed_password_after(claims.iat) {
        warn!(user_id = %account.id, "token predates password change");
        return Err(AuthRejection::StaleSession.into());
    }

    Ok(account)
}

pub async fn require_auth(
    State(state): State<AppState>,
    mut req: Request,
    next: Next,
) -> Result<Response, AppError> {
    let account = authenticate(&state, req.headers()).await?;
    req.extensions_mut().insert(AuthUser(account));
    Ok(next.run(req).await)
}

/// Fails closed: a request without an authenticated identity is refused.
pub fn ensure_role(identity: Option<&AuthUser>, allowed: &[Role]) -> Result<(), AppError> {
    match identity {
        Some(AuthUser(account)) if allowed.contains(&account.role) => Ok(()),
        Some(AuthUser(account)) => {
            warn!(user_id = %account.id, role = ?account.role, "role not permitted");
            Err(AppError::Forbidden(
                "You do not have permission to perform this action".into(),
            ))
        }
        None => Err(AppError::Forbidden(
            "You do not have permission to perform this action".into(),
        )),
    }
}

pub async fn require_admin(req: Request, next: Next) -> Result<Response, AppError> {
    ensure_role(req.extensions().get::<AuthUser>(), &[Role::Admin])?;
    Ok(next.run(req).await)
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        if let Some(user) = parts.extensions.get::<AuthUser>() {
            return Ok(user.clone());
        }
        let account = authenticate(state, &parts.headers).await?;
        Ok(AuthUser(account))
    }
}

#[async_trait]
impl FromRequestParts<AppState> for MaybeAuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        match authenticate(state, &parts.headers).await {
            Ok(account) => Ok(MaybeAuthUser(Some(account))),
            Err(GateError::Rejected(_)) => Ok(MaybeAuthUser(None)),
            Err(GateError::Store(e)) => Err(e.into()),
        }
    }
}
