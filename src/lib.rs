//! User accounts backend: registration, login, password reset and admin
//! management of accounts, served over HTTP with axum.

pub mod app;
pub mod auth;
pub mod config;
pub mod error;
pub mod mailer;
pub mod state;
pub mod users;
