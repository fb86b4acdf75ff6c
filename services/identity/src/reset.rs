//! Password-reset challenges
//!
//! Two recovery modes share one pending slot per identity:
//!
//! - **token**: 32 random bytes, hex encoded and mailed to the user. Only the
//!   SHA-256 digest is stored. Valid for an hour by default.
//! - **otp**: a 6-digit code stored as issued, bound to the account email.
//!   Valid for ten minutes by default.
//!
//! Issuing either mode replaces whatever was pending. Redemption sets the new
//! password and clears the slot in one guarded store update, so a challenge
//! can be used once. Every redemption failure maps to the same error.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Utc};
use rand::{Rng, RngCore};
use sha2::{Digest, Sha256};
use std::fmt::Write as _;
use std::sync::Arc;
use subtle::ConstantTimeEq;
use tracing::{info, warn};

use crate::clock::{Clock, checked_after};
use crate::error::AuthError;
use crate::models::{ResetChallenge, User};
use crate::password::PasswordHasher;
use crate::repositories::UserStore;

const TOKEN_BYTES: usize = 32;
const OTP_DIGITS: usize = 6;

/// Longest accepted challenge lifetime, one week
pub const MAX_CHALLENGE_TTL_SECONDS: u64 = 604_800;

/// Challenge lifetimes
#[derive(Debug, Clone)]
pub struct ResetConfig {
    pub token_ttl_seconds: u64,
    pub otp_ttl_seconds: u64,
}

impl Default for ResetConfig {
    fn default() -> Self {
        Self {
            token_ttl_seconds: 3600, // 1 hour
            otp_ttl_seconds: 600,    // 10 minutes
        }
    }
}

impl ResetConfig {
    /// Create a new ResetConfig from environment variables
    ///
    /// # Environment Variables
    /// - `RESET_TOKEN_TTL_SECONDS`: token lifetime (default: 3600)
    /// - `RESET_OTP_TTL_SECONDS`: code lifetime (default: 600)
    ///
    /// Both are capped at one week.
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();
        Ok(Self {
            token_ttl_seconds: ttl_from_env("RESET_TOKEN_TTL_SECONDS", defaults.token_ttl_seconds)?,
            otp_ttl_seconds: ttl_from_env("RESET_OTP_TTL_SECONDS", defaults.otp_ttl_seconds)?,
        })
    }
}

fn ttl_from_env(name: &str, default: u64) -> Result<u64> {
    let ttl = std::env::var(name)
        .ok()
        .and_then(|s| s.parse().ok())
        .unwrap_or(default);

    if ttl > MAX_CHALLENGE_TTL_SECONDS {
        anyhow::bail!("{} must not exceed {}", name, MAX_CHALLENGE_TTL_SECONDS);
    }
    Ok(ttl)
}

/// Recovery mode requested by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    Token,
    Otp,
}

/// Secret to hand to the notifier. Never persisted in this form for tokens.
#[derive(Clone)]
pub struct IssuedChallenge {
    pub mode: ResetMode,
    pub secret: String,
    pub expires_at: DateTime<Utc>,
}

impl std::fmt::Debug for IssuedChallenge {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IssuedChallenge")
            .field("mode", &self.mode)
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// Lowercase hex SHA-256 of `value`
pub fn sha256_hex(value: &str) -> String {
    let digest = Sha256::digest(value.as_bytes());
    let mut hex = String::with_capacity(digest.len() * 2);
    for byte in digest.iter() {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

fn generate_token() -> String {
    let mut bytes = [0u8; TOKEN_BYTES];
    rand::thread_rng().fill_bytes(&mut bytes);
    let mut hex = String::with_capacity(TOKEN_BYTES * 2);
    for byte in bytes {
        let _ = write!(&mut hex, "{byte:02x}");
    }
    hex
}

fn generate_otp() -> String {
    let code: u32 = rand::thread_rng().gen_range(0..1_000_000);
    format!("{:0width$}", code, width = OTP_DIGITS)
}

fn expiry(now: DateTime<Utc>, ttl_seconds: u64) -> Result<DateTime<Utc>> {
    checked_after(now, ttl_seconds)
        .ok_or_else(|| anyhow!("challenge lifetime of {}s overflows the clock", ttl_seconds))
}

/// Issues and redeems reset challenges
#[derive(Clone)]
pub struct ResetChallengeManager {
    store: Arc<dyn UserStore>,
    hasher: PasswordHasher,
    config: ResetConfig,
    clock: Arc<dyn Clock>,
}

impl ResetChallengeManager {
    pub fn new(
        store: Arc<dyn UserStore>,
        hasher: PasswordHasher,
        config: ResetConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            hasher,
            config,
            clock,
        }
    }

    /// Issue a challenge of `mode`, replacing any pending one
    pub async fn issue(&self, user: &User, mode: ResetMode) -> Result<IssuedChallenge> {
        let now = self.clock.now();
        let (secret, challenge) = match mode {
            ResetMode::Token => {
                let raw = generate_token();
                let expires_at = expiry(now, self.config.token_ttl_seconds)?;
                let challenge = ResetChallenge::Token {
                    token_hash: sha256_hex(&raw),
                    expires_at,
                };
                (raw, challenge)
            }
            ResetMode::Otp => {
                let code = generate_otp();
                let expires_at = expiry(now, self.config.otp_ttl_seconds)?;
                let challenge = ResetChallenge::Otp {
                    code: code.clone(),
                    expires_at,
                };
                (code, challenge)
            }
        };

        self.store
            .set_reset_challenge(user.id, &challenge, now)
            .await?;
        info!("Issued {} reset challenge for user {}", challenge.kind(), user.id);

        Ok(IssuedChallenge {
            mode,
            secret,
            expires_at: challenge.expires_at(),
        })
    }

    /// Redeem a mailed token and set `new_password`
    ///
    /// Hex case is ignored; the digest is always taken over lowercase text.
    pub async fn redeem_token(&self, raw_token: &str, new_password: &str) -> Result<User, AuthError> {
        let token = raw_token.trim().to_ascii_lowercase();
        let user = self
            .store
            .find_by_reset_token_hash(&sha256_hex(&token))
            .await?
            .ok_or(AuthError::InvalidOrExpiredChallenge)?;

        let challenge = match &user.reset_challenge {
            Some(c @ ResetChallenge::Token { .. }) => c.clone(),
            _ => return Err(AuthError::InvalidOrExpiredChallenge),
        };

        self.complete(user, challenge, new_password).await
    }

    /// Redeem a one-time code sent to `email` and set `new_password`
    pub async fn redeem_otp(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<User, AuthError> {
        let user = self
            .store
            .find_by_email(email)
            .await?
            .ok_or(AuthError::InvalidOrExpiredChallenge)?;

        let challenge = match &user.reset_challenge {
            Some(c @ ResetChallenge::Otp { code: stored, .. })
                if bool::from(stored.as_bytes().ct_eq(code.trim().as_bytes())) =>
            {
                c.clone()
            }
            _ => return Err(AuthError::InvalidOrExpiredChallenge),
        };

        self.complete(user, challenge, new_password).await
    }

    async fn complete(
        &self,
        mut user: User,
        challenge: ResetChallenge,
        new_password: &str,
    ) -> Result<User, AuthError> {
        if challenge.is_expired(self.clock.now()) {
            return Err(AuthError::InvalidOrExpiredChallenge);
        }

        let password_hash = self.hasher.hash(new_password).await?;

        // Re-read the clock: hashing takes a while.
        let now = self.clock.now();
        if !self
            .store
            .complete_reset(user.id, &challenge, &password_hash, now)
            .await?
        {
            warn!("Reset challenge for user {} was consumed concurrently", user.id);
            return Err(AuthError::InvalidOrExpiredChallenge);
        }

        info!("Password reset completed for user {}", user.id);
        user.reset_challenge = None;
        user.failed_login_attempts = 0;
        user.locked_until = None;
        user.updated_at = now;
        Ok(user)
    }
}
