//! Pending password-reset challenge

use chrono::{DateTime, Utc};
use std::fmt;

/// The single pending reset slot of an identity.
///
/// Both recovery modes share the slot, so issuing one replaces the other.
/// `Debug` output omits the stored secret.
#[derive(Clone, PartialEq, Eq)]
pub enum ResetChallenge {
    /// SHA-256 hex digest of an opaque token handed out by email
    Token {
        token_hash: String,
        expires_at: DateTime<Utc>,
    },
    /// Numeric one-time code, stored as issued
    Otp {
        code: String,
        expires_at: DateTime<Utc>,
    },
}

impl fmt::Debug for ResetChallenge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResetChallenge")
            .field("kind", &self.kind())
            .field("secret", &"<redacted>")
            .field("expires_at", &self.expires_at())
            .finish()
    }
}

impl ResetChallenge {
    pub const TOKEN_KIND: &'static str = "token";
    pub const OTP_KIND: &'static str = "otp";

    /// Storage tag of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            ResetChallenge::Token { .. } => Self::TOKEN_KIND,
            ResetChallenge::Otp { .. } => Self::OTP_KIND,
        }
    }

    /// Persisted secret: the digest for tokens, the code for OTPs
    pub fn secret(&self) -> &str {
        match self {
            ResetChallenge::Token { token_hash, .. } => token_hash,
            ResetChallenge::Otp { code, .. } => code,
        }
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        match self {
            ResetChallenge::Token { expires_at, .. } | ResetChallenge::Otp { expires_at, .. } => {
                *expires_at
            }
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at()
    }

    /// Rebuild a challenge from its three storage columns.
    ///
    /// Returns `None` when the slot is empty or the tag is unknown.
    pub fn from_parts(
        kind: Option<&str>,
        secret: Option<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Option<Self> {
        let (secret, expires_at) = (secret?, expires_at?);
        match kind? {
            Self::TOKEN_KIND => Some(ResetChallenge::Token {
                token_hash: secret,
                expires_at,
            }),
            Self::OTP_KIND => Some(ResetChallenge::Otp {
                code: secret,
                expires_at,
            }),
            _ => None,
        }
    }
}
