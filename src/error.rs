//! Error taxonomy shared by every handler, and its mapping onto HTTP.
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::{
    auth::{jwt::TokenError, password::PasswordError, reset::ResetTokenError},
    mailer::DeliveryError,
    users::repo::StoreError,
};

/// A single rejected input field.
#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct FieldError {
    pub field: &'static str,
    pub message: String,
}

impl FieldError {
    pub fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error("Invalid input data")]
    Validation(Vec<FieldError>),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    Unauthorized(String),

    #[error("{0}")]
    Forbidden(String),

    #[error("There was an error sending the email. Try again later!")]
    Delivery(#[source] DeliveryError),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            AppError::Validation(_) => StatusCode::UNPROCESSABLE_ENTITY,
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::NotFound(_) => StatusCode::NOT_FOUND,
            AppError::Unauthorized(_) => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::Delivery(_) | AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn validation(field: &'static str, message: impl Into<String>) -> Self {
        AppError::Validation(vec![FieldError::new(field, message)])
    }

    /// Message shown to clients. Internal failures are only described in
    /// debug builds.
    fn public_message(&self) -> String {
        match self {
            AppError::Internal(e) if cfg!(debug_assertions) => format!("{e:#}"),
            AppError::Internal(_) => "Something went wrong".to_string(),
            other => other.to_string(),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    status: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<Vec<FieldError>>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            match &self {
                AppError::Delivery(e) => tracing::error!(error = %e, "email delivery failed"),
                other => tracing::error!(error = ?other, "internal error"),
            }
        }

        let body = ErrorBody {
            status: if status.is_client_error() { "fail" } else { "error" },
            message: self.public_message(),
            errors: match self {
                AppError::Validation(errors) => Some(errors),
                _ => None,
            },
        };
        (status, Json(body)).into_response()
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::Conflict => AppError::Conflict("Email already in use".into()),
            StoreError::NotFound => AppError::NotFound("No user found with that ID".into()),
            StoreError::Backend(e) => AppError::Internal(e),
        }
    }
}

impl From<PasswordError> for AppError {
    fn from(e: PasswordError) -> Self {
        AppError::Internal(e.into())
    }
}

impl From<ResetTokenError> for AppError {
    fn from(e: ResetTokenError) -> Self {
        AppError::Internal(e.into())
    }
}

impl From<TokenError> for AppError {
    fn from(e: TokenError) -> Self {
        match e {
            TokenError::Signing => AppError::Internal(e.into()),
            TokenError::Invalid | TokenError::Expired => {
                AppError::Unauthorized("Invalid or expired token. Please log in again.".into())
            }
        }
    }
}

impl From<DeliveryError> for AppError {
    fn from(e: DeliveryError) -> Self {
        AppError::Delivery(e)
    }
}
