use lazy_static::lazy_static;
use regex::Regex;
use time::OffsetDateTime;
use tracing::{error, info, warn};

use crate::{
    auth::{
        password::{hash_password_blocking, verify_dummy_blocking, verify_password_blocking},
        reset::{self, ResetToken},
    },
    error::{AppError, FieldError},
    mailer::Email,
    state::AppState,
    users::repo_types::{Account, NewAccount, Role},
};

pub const MIN_PASSWORD_LEN: usize = 8;
pub const MAX_NAME_LEN: usize = 100;

const INVALID_CREDENTIALS: &str = "Incorrect email or password";

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

pub fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

fn check_email(email: &str, errors: &mut Vec<FieldError>) {
    if !is_valid_email(email) {
        errors.push(FieldError::new("email", "Please provide a valid email"));
    }
}

fn check_name(name: Option<&str>, errors: &mut Vec<FieldError>) {
    if let Some(name) = name {
        if name.trim().is_empty() {
            errors.push(FieldError::new("name", "Name must not be empty"));
        } else if name.chars().count() > MAX_NAME_LEN {
            errors.push(FieldError::new("name", "Name must be at most 100 characters"));
        }
    }
}

fn check_new_password(password: &str, confirm: Option<&str>, errors: &mut Vec<FieldError>) {
    if password.chars().count() < MIN_PASSWORD_LEN {
        errors.push(FieldError::new(
            "password",
            "Password must be at least 8 characters",
        ));
    }
    if confirm.is_some_and(|c| c != password) {
        errors.push(FieldError::new("password_confirm", "Passwords are not the same"));
    }
}

fn finish(errors: Vec<FieldError>) -> Result<(), AppError> {
    if errors.is_empty() {
        Ok(())
    } else {
        Err(AppError::Validation(errors))
    }
}

/// The stored password change time is rounded up to a whole second, so a
/// token minted in that second is issued at the change time instead of now.
fn issue_token(state: &AppState, account: &Account) -> Result<String, AppError> {
    let now = OffsetDateTime::now_utc();
    let issued_at = account.password_changed_at.map_or(now, |changed| changed.max(now));
    Ok(state.keys.issue_at(account.id, issued_at)?)
}

/// Input shared by public registration and admin account creation.
#[derive(Debug)]
pub struct Registration {
    pub email: String,
    pub password: String,
    pub password_confirm: Option<String>,
    pub name: Option<String>,
    /// `None` means the default role.
    pub role: Option<Role>,
}

/// Partial profile change. Credentials and role are not representable here.
#[derive(Debug, Default)]
pub struct ProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
}

pub async fn create_account(state: &AppState, input: Registration) -> Result<Account, AppError> {
    let email = normalize_email(&input.email);
    let name = input.name.map(|n| n.trim().to_string());

    let mut errors = Vec::new();
    check_email(&email, &mut errors);
    check_name(name.as_deref(), &mut errors);
    check_new_password(&input.password, input.password_confirm.as_deref(), &mut errors);
    finish(errors)?;

    if state.users.find_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AppError::Conflict("Email already registered".into()));
    }

    let password_hash = hash_password_blocking(&input.password).await?;
    let account = state
        .users
        .create(NewAccount {
            email,
            name,
            password_hash,
            role: input.role.unwrap_or_default(),
        })
        .await?;

    info!(user_id = %account.id, role = ?account.role, "account created");
    Ok(account)
}

pub async fn register(
    state: &AppState,
    input: Registration,
) -> Result<(Account, String), AppError> {
    let account = create_account(state, input).await?;
    let token = issue_token(state, &account)?;
    Ok((account, token))
}

/// Unknown email and wrong password produce the same error.
pub async fn login(
    state: &AppState,
    email: &str,
    password: &str,
) -> Result<(Account, String), AppError> {
    let email = normalize_email(email);
    if email.is_empty() || password.is_empty() {
        return Err(AppError::BadRequest(
            "Please provide email and password!".into(),
        ));
    }

    let Some(mut account) = state.users.find_by_email(&email).await? else {
        verify_dummy_blocking(password).await?;
        warn!(email = %email, "login unknown email");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
    };

    if !verify_password_blocking(password, &account.password_hash).await? {
        warn!(user_id = %account.id, "login invalid password");
        return Err(AppError::Unauthorized(INVALID_CREDENTIALS.into()));
    }

    if !account.is_active {
        warn!(user_id = %account.id, "login to deactivated account");
        return Err(AppError::Unauthorized(
            "This account has been deactivated".into(),
        ));
    }

    account.last_login_at = Some(OffsetDateTime::now_utc());
    let account = state.users.save(&account).await?;
    let token = issue_token(state, &account)?;

    info!(user_id = %account.id, "user logged in");
    Ok((account, token))
}

/// Stores a reset digest and emails the secret. If the email cannot be
/// delivered the digest is cleared again so no unannounced reset token stays
/// valid.
pub async fn forgot_password(state: &AppState, email: &str) -> Result<(), AppError> {
    let email = normalize_email(email);
    // NOTE: unlike login this reveals whether the address is registered.
    let Some(mut account) = state.users.find_by_email(&email).await? else {
        return Err(AppError::NotFound(
            "There is no user with that email address".into(),
        ));
    };

    let token = ResetToken::generate()?;
    account.set_reset_token(token.digest.clone(), token.expires_at);
    let mut account = state.users.save(&account).await?;

    let link = format!(
        "{}/auth/reset-password/{}",
        state.config.public_url.trim_end_matches('/'),
        token.secret
    );
    let message = Email {
        to: account.email.clone(),
        subject: "Your password reset token (valid for 10 minutes)".into(),
        body: format!(
            "Forgot your password? Submit a PATCH request with your new password to: {link}\n\
             If you didn't forget your password, please ignore this email."
        ),
    };

    if let Err(e) = state.mailer.send(&message).await {
        account.clear_reset_token();
        if let Err(rollback) = state.users.save(&account).await {
            error!(user_id = %account.id, error = %rollback, "failed to clear reset token after delivery failure");
        }
        return Err(e.into());
    }

    info!(user_id = %account.id, "password reset token sent");
    Ok(())
}

pub async fn reset_password(
    state: &AppState,
    secret: &str,
    password: &str,
    password_confirm: Option<&str>,
) -> Result<(Account, String), AppError> {
    let now = OffsetDateTime::now_utc();
    let invalid = || AppError::BadRequest("Token is invalid or has expired".into());

    let mut account = state
        .users
        .find_by_reset_digest(&reset::digest(secret), now)
        .await?
        .ok_or_else(invalid)?;
    let digest_matches = account
        .reset_token_digest
        .as_deref()
        .is_some_and(|stored| reset::matches(secret, stored));
    if !digest_matches {
        return Err(invalid());
    }

    let mut errors = Vec::new();
    check_new_password(password, password_confirm, &mut errors);
    finish(errors)?;

    let hash = hash_password_blocking(password).await?;
    account.set_password(hash, now);
    account.clear_reset_token();
    let account = state.users.save(&account).await?;
    let token = issue_token(state, &account)?;

    info!(user_id = %account.id, "password reset");
    Ok((account, token))
}

pub async fn change_password(
    state: &AppState,
    mut account: Account,
    current: &str,
    password: &str,
    password_confirm: Option<&str>,
) -> Result<(Account, String), AppError> {
    if !verify_password_blocking(current, &account.password_hash).await? {
        warn!(user_id = %account.id, "wrong current password");
        return Err(AppError::Unauthorized(
            "Your current password is wrong".into(),
        ));
    }

    let mut errors = Vec::new();
    check_new_password(password, password_confirm, &mut errors);
    finish(errors)?;

    let hash = hash_password_blocking(password).await?;
    account.set_password(hash, OffsetDateTime::now_utc());
    let account = state.users.save(&account).await?;
    let token = issue_token(state, &account)?;

    info!(user_id = %account.id, "password changed");
    Ok((account, token))
}

/// Validates and applies `update` to `account` in place.
pub fn apply_profile(account: &mut Account, update: ProfileUpdate) -> Result<(), AppError> {
    let email = update.email.as_deref().map(normalize_email);
    let name = update.name.map(|n| n.trim().to_string());

    let mut errors = Vec::new();
    if let Some(email) = &email {
        check_email(email, &mut errors);
    }
    check_name(name.as_deref(), &mut errors);
    finish(errors)?;

    if let Some(email) = email {
        account.email = email;
    }
    if name.is_some() {
        account.name = name;
    }
    Ok(())
}

pub async fn update_profile(
    state: &AppState,
    mut account: Account,
    update: ProfileUpdate,
) -> Result<Account, AppError> {
    apply_profile(&mut account, update)?;
    let account = state.users.save(&account).await?;
    info!(user_id = %account.id, "profile updated");
    Ok(account)
}
