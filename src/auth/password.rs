use argon2::{
    password_hash::{rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString},
    Argon2,
};
use lazy_static::lazy_static;
use thiserror::Error;
use tokio::task;
use tracing::error;

#[derive(Debug, Error)]
pub enum PasswordError {
    #[error("password hashing failed: {0}")]
    Hash(String),
    #[error("stored password hash is malformed: {0}")]
    MalformedHash(String),
    #[error("password hashing task failed: {0}")]
    Task(#[from] task::JoinError),
}

/// Argon2id with a fresh random salt embedded in the PHC string, so two
/// hashes of the same password never match byte for byte.
pub fn hash_password(plain: &str) -> Result<String, PasswordError> {
    let salt = SaltString::generate(&mut OsRng);
    let hash = Argon2::default()
        .hash_password(plain.as_bytes(), &salt)
        .map_err(|e| {
            error!(error = %e, "argon2 hash_password error");
            PasswordError::Hash(e.to_string())
        })?
        .to_string();
    Ok(hash)
}

/// A mismatch is `Ok(false)`; only an unparsable stored hash is an error.
pub fn verify_password(plain: &str, hash: &str) -> Result<bool, PasswordError> {
    let parsed = PasswordHash::new(hash).map_err(|e| {
        error!(error = %e, "argon2 parse hash error");
        PasswordError::MalformedHash(e.to_string())
    })?;
    Ok(Argon2::default()
        .verify_password(plain.as_bytes(), &parsed)
        .is_ok())
}

// Argon2 is CPU bound; keep it off the async workers.

pub async fn hash_password_blocking(plain: &str) -> Result<String, PasswordError> {
    let plain = plain.to_owned();
    task::spawn_blocking(move || hash_password(&plain)).await?
}

pub async fn verify_password_blocking(plain: &str, hash: &str) -> Result<bool, PasswordError> {
    let (plain, hash) = (plain.to_owned(), hash.to_owned());
    task::spawn_blocking(move || verify_password(&plain, &hash)).await?
}

lazy_static! {
    static ref DUMMY_HASH: Option<String> = hash_password("userhub-no-such-account").ok();
}

/// Spends the same Argon2 work as a real verification, for logins whose
/// email matched no account. Always `false`.
pub async fn verify_dummy_blocking(plain: &str) -> Result<bool, PasswordError> {
    let plain = plain.to_owned();
    task::spawn_blocking(move || match DUMMY_HASH.as_deref() {
        Some(hash) => verify_password(&plain, hash).map(|_| false),
        None => Ok(false),
    })
    .await?
}
