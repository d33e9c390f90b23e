use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    middleware,
    routing::{get, patch},
    Json, Router,
};
use tracing::{info, instrument};
use uuid::Uuid;

use crate::{
    auth::{
        dto::PublicUser,
        extractors::{require_admin, require_auth, AuthUser},
        services::{self, ProfileUpdate, Registration},
    },
    error::AppError,
    state::AppState,
    users::repo_types::Account,
};

use super::dto::{CreateUserRequest, LookupQuery, Pagination, UpdateUserRequest};

/// Every route here needs an authenticated admin. `require_admin` runs after
/// `require_auth` because route layers wrap outermost-last.
pub fn admin_routes(state: AppState) -> Router<AppState> {
    Router::new()
        .route("/users", get(list_users).post(create_user))
        .route(
            "/users/:id",
            get(get_user).patch(update_user).delete(delete_user),
        )
        .route("/users/:id/deactivate", patch(deactivate_user))
        .route("/users/:id/reactivate", patch(reactivate_user))
        .route("/users/:id/restore", patch(restore_user))
        .route_layer(middleware::from_fn(require_admin))
        .route_layer(middleware::from_fn_with_state(state, require_auth))
}

async fn load(state: &AppState, id: Uuid, include_deleted: bool) -> Result<Account, AppError> {
    state
        .users
        .find_by_id(id, include_deleted)
        .await?
        .ok_or_else(|| AppError::NotFound("No user found with that ID".into()))
}

#[instrument(skip_all)]
pub async fn list_users(
    State(state): State<AppState>,
    Query(p): Query<Pagination>,
) -> Result<Json<Vec<PublicUser>>, AppError> {
    let accounts = state.users.list(p.into()).await?;
    Ok(Json(accounts.into_iter().map(PublicUser::from).collect()))
}

#[instrument(skip_all, fields(admin_id = %admin.id))]
pub async fn create_user(
    State(state): State<AppState>,
    AuthUser(admin): AuthUser,
    Json(payload): Json<CreateUserRequest>,
) -> Result<(StatusCode, Json<PublicUser>), AppError> {
    let account = services::create_account(
        &state,
        Registration {
            email: payload.email,
            password: payload.password,
            password_confirm: payload.password_confirm,
            name: payload.name,
            role: payload.role,
        },
    )
    .await?;
    Ok((StatusCode::CREATED, Json(account.into())))
}

#[instrument(skip_all, fields(user_id = %id))]
pub async fn get_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Query(q): Query<LookupQuery>,
) -> Result<Json<PublicUser>, AppError> {
    let account = load(&state, id, q.include_deleted).await?;
    Ok(Json(account.into()))
}

#[instrument(skip_all, fields(user_id = %id))]
pub async fn update_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
    Json(payload): Json<UpdateUserRequest>,
) -> Result<Json<PublicUser>, AppError> {
    if payload.password || payload.password_confirm {
        return Err(AppError::validation(
            "password",
            "Passwords cannot be changed here. Use /auth/update-password or the reset flow.",
        ));
    }

    let mut account = load(&state, id, false).await?;
    services::apply_profile(
        &mut account,
        ProfileUpdate {
            name: payload.name,
            email: payload.email,
        },
    )?;
    if let Some(role) = payload.role {
        account.role = role;
    }
    let account = state.users.save(&account).await?;
    info!(user_id = %account.id, role = ?account.role, "user updated by admin");
    Ok(Json(account.into()))
}

#[instrument(skip_all, fields(user_id = %id))]
pub async fn delete_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<StatusCode, AppError> {
    state.users.soft_delete(id).await?;
    info!(user_id = %id, "user soft-deleted");
    Ok(StatusCode::NO_CONTENT)
}

async fn set_active(state: &AppState, id: Uuid, active: bool) -> Result<Account, AppError> {
    let mut account = load(state, id, false).await?;
    account.is_active = active;
    let account = state.users.save(&account).await?;
    info!(user_id = %id, active, "user activation changed");
    Ok(account)
}

#[instrument(skip_all, fields(user_id = %id))]
pub async fn deactivate_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, AppError> {
    Ok(Json(set_active(&state, id, false).await?.into()))
}

#[instrument(skip_all, fields(user_id = %id))]
pub async fn reactivate_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, AppError> {
    Ok(Json(set_active(&state, id, true).await?.into()))
}

#[instrument(skip_all, fields(user_id = %id))]
pub async fn restore_user(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<PublicUser>, AppError> {
    let account = state.users.restore(id).await?;
    info!(user_id = %id, "user restored");
    Ok(Json(account.into()))
}
