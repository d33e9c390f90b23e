//! Single-use password-reset secrets.
//!
//! The plaintext secret only ever travels to the user by email. Accounts store
//! its SHA-256 digest, which is deterministic so the reset request can be
//! matched by digest lookup.
use constant_time_eq::constant_time_eq;
use rand::{rngs::OsRng, RngCore};
use sha2::{Digest, Sha256};
use thiserror::Error;
use time::{Duration, OffsetDateTime};

pub const RESET_TOKEN_TTL: Duration = Duration::minutes(10);

#[derive(Debug, Error)]
#[error("could not gather entropy for reset token: {0}")]
pub struct ResetTokenError(#[from] rand::Error);

pub struct ResetToken {
    pub secret: String,
    pub digest: String,
    pub expires_at: OffsetDateTime,
}

// Debug omits the secret.
impl std::fmt::Debug for ResetToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResetToken")
            .field("digest", &self.digest)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

impl ResetToken {
    /// 32 random bytes (256 bits), hex encoded.
    pub fn generate() -> Result<Self, ResetTokenError> {
        Self::generate_at(OffsetDateTime::now_utc())
    }

    pub fn generate_at(now: OffsetDateTime) -> Result<Self, ResetTokenError> {
        let mut bytes = [0u8; 32];
        OsRng.try_fill_bytes(&mut bytes)?;
        let secret = hex::encode(bytes);
        Ok(Self {
            digest: digest(&secret),
            secret,
            expires_at: now + RESET_TOKEN_TTL,
        })
    }
}

pub fn digest(secret: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(secret.as_bytes());
    hex::encode(hasher.finalize())
}

pub fn matches(secret: &str, stored_digest: &str) -> bool {
    constant_time_eq(digest(secret).as_bytes(), stored_digest.as_bytes())
}
