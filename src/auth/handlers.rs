use axum::{
    extract::{Path, State},
    http::{header::SET_COOKIE, StatusCode},
    middleware,
    response::IntoResponse,
    routing::{get, patch, post},
    Json, Router,
};
use tracing::instrument;

use crate::{
    auth::{
        dto::{
            AuthResponse, ForgotPasswordRequest, LoginRequest, MessageResponse, PublicUser,
            RegisterRequest, ResetPasswordRequest, SessionResponse, UpdateMeRequest,
            UpdatePasswordRequest,
        },
        extractors::{require_auth, AuthUser, MaybeAuthUser},
        services::{self, ProfileUpdate, Registration},
    },
    error::AppError,
    state::AppState,
    users::repo_types::Account,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/auth/register", post(register))
        .route("/auth/login", post(login))
        .route("/auth/logout", post(logout))
        .route("/auth/forgot-password", post(forgot_password))
        .route("/auth/reset-password/:secret", patch(reset_password))
        .route("/auth/session", get(session))
}

pub fn me_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/auth/me", get(get_me))
        .route("/auth/update-me", patch(update_me))
        .route("/auth/update-password", patch(update_password))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

fn session_cookie(state: &AppState, token: &str) -> String {
    let secure = if state.config.public_url.starts_with("https://") {
        "; Secure"
    } else {
        ""
    };
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age={}{}",
        state.config.cookie_name,
        token,
        state.keys.ttl().whole_seconds(),
        secure
    )
}

fn signed_in(
    state: &AppState,
    status: StatusCode,
    account: Account,
    token: String,
) -> impl IntoResponse {
    let cookie = session_cookie(state, &token);
    (
        status,
        [(SET_COOKIE, cookie)],
        Json(AuthResponse {
            token,
            user: account.into(),
        }),
    )
}

#[instrument(skip_all)]
pub async fn register(
    State(state): State<AppState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (account, token) = services::register(
        &state,
        Registration {
            email: payload.email,
            password: payload.password,
            password_confirm: payload.password_confirm,
            name: payload.name,
            role: None,
        },
    )
    .await?;
    Ok(signed_in(&state, StatusCode::CREATED, account, token))
}

#[instrument(skip_all)]
pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (account, token) = services::login(&state, &payload.email, &payload.password).await?;
    Ok(signed_in(&state, StatusCode::OK, account, token))
}

pub async fn logout(State(state): State<AppState>) -> impl IntoResponse {
    let cookie = format!(
        "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0",
        state.config.cookie_name
    );
    (
        [(SET_COOKIE, cookie)],
        Json(MessageResponse {
            message: "Logged out",
        }),
    )
}

#[instrument(skip_all)]
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ForgotPasswordRequest>,
) -> Result<Json<MessageResponse>, AppError> {
    services::forgot_password(&state, &payload.email).await?;
    Ok(Json(MessageResponse {
        message: "Token sent to email!",
    }))
}

#[instrument(skip_all)]
pub async fn reset_password(
    State(state): State<AppState>,
    Path(secret): Path<String>,
    Json(payload): Json<ResetPasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (account, token) = services::reset_password(
        &state,
        &secret,
        &payload.password,
        payload.password_confirm.as_deref(),
    )
    .await?;
    Ok(signed_in(&state, StatusCode::OK, account, token))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn get_me(AuthUser(user): AuthUser) -> Json<PublicUser> {
    Json(user.into())
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_me(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<UpdateMeRequest>,
) -> Result<Json<PublicUser>, AppError> {
    if payload.touches_password() {
        return Err(AppError::validation(
            "password",
            "This route is not for password updates. Please use /auth/update-password.",
        ));
    }
    let account = services::update_profile(
        &state,
        user,
        ProfileUpdate {
            name: payload.name,
            email: payload.email,
        },
    )
    .await?;
    Ok(Json(account.into()))
}

#[instrument(skip_all, fields(user_id = %user.id))]
pub async fn update_password(
    State(state): State<AppState>,
    AuthUser(user): AuthUser,
    Json(payload): Json<UpdatePasswordRequest>,
) -> Result<impl IntoResponse, AppError> {
    let (account, token) = services::change_password(
        &state,
        user,
        &payload.current_password,
        &payload.password,
        payload.password_confirm.as_deref(),
    )
    .await?;
    Ok(signed_in(&state, StatusCode::OK, account, token))
}

/// Works for guests too; an unusable token just reads as logged out.
pub async fn session(MaybeAuthUser(user): MaybeAuthUser) -> Json<SessionResponse> {
    Json(SessionResponse {
        authenticated: user.is_some(),
        user: user.map(PublicUser::from),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cookie_carries_token_and_lifetime() {
        let state = AppState::fake();
        let cookie = session_cookie(&state, "abc.def.ghi");
        assert!(cookie.starts_with("jwt=abc.def.ghi;"));
        assert!(cookie.contains("HttpOnly"));
        assert!(cookie.contains("Max-Age=3600"));
        assert!(!cookie.contains("Secure"));
    }
}
