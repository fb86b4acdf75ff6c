//! JWT service for token generation and validation
//!
//! This module mints the signed, time-bounded claims sets handed to clients:
//! access tokens, refresh tokens and purpose-scoped tokens. Tokens are signed
//! with RS256 when a PEM key pair is configured and HS256 otherwise.
//!
//! Verification never throws: it returns a [`Verification`] that is either
//! the trusted claims or the reason they were rejected. Expiry is checked
//! against the service clock after the signature has been verified.

use anyhow::Result;
use chrono::Duration;
use jsonwebtoken::{
    Algorithm, DecodingKey, EncodingKey, Header, Validation, decode, encode, errors::ErrorKind,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use uuid::Uuid;

use crate::clock::{Clock, duration_from_secs};
use crate::models::{Role, User};

/// Key material used to sign tokens
#[derive(Clone)]
pub enum SigningKeys {
    /// RS256 key pair in PEM format
    Rsa {
        private_key: String,
        public_key: String,
    },
    /// HS256 shared secret
    Secret(String),
}

impl fmt::Debug for SigningKeys {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SigningKeys::Rsa { .. } => f.write_str("Rsa(<redacted>)"),
            SigningKeys::Secret(_) => f.write_str("Secret(<redacted>)"),
        }
    }
}

/// JWT configuration
#[derive(Debug, Clone)]
pub struct JwtConfig {
    pub keys: SigningKeys,
    /// Access token expiration time in seconds (default: 1 day)
    pub access_token_expiry: u64,
    /// Refresh token expiration time in seconds (default: 30 days)
    pub refresh_token_expiry: u64,
}

impl JwtConfig {
    pub const DEFAULT_ACCESS_TOKEN_EXPIRY: u64 = 86_400;
    pub const DEFAULT_REFRESH_TOKEN_EXPIRY: u64 = 2_592_000;
    /// Longest accepted lifetime for either token, ten years
    pub const MAX_TOKEN_EXPIRY: u64 = 315_360_000;

    /// HS256 configuration with default lifetimes
    pub fn with_secret(secret: impl Into<String>) -> Self {
        Self {
            keys: SigningKeys::Secret(secret.into()),
            access_token_expiry: Self::DEFAULT_ACCESS_TOKEN_EXPIRY,
            refresh_token_expiry: Self::DEFAULT_REFRESH_TOKEN_EXPIRY,
        }
    }

    /// Create a new JwtConfig from environment variables
    ///
    /// # Environment Variables
    /// - `JWT_PRIVATE_KEY` / `JWT_PUBLIC_KEY`: RS256 key pair (PEM or path to a PEM file)
    /// - `JWT_SECRET`: HS256 secret, used when no key pair is set
    /// - `JWT_ACCESS_TOKEN_EXPIRY`: Access token expiry in seconds (default: 86400)
    /// - `JWT_REFRESH_TOKEN_EXPIRY`: Refresh token expiry in seconds (default: 2592000)
    pub fn from_env() -> Result<Self> {
        let keys = match (
            std::env::var("JWT_PRIVATE_KEY"),
            std::env::var("JWT_PUBLIC_KEY"),
        ) {
            (Ok(private_key), Ok(public_key)) => SigningKeys::Rsa {
                private_key: read_pem(&private_key)?,
                public_key: read_pem(&public_key)?,
            },
            _ => {
                let secret = std::env::var("JWT_SECRET").map_err(|_| {
                    anyhow::anyhow!("Either JWT_PRIVATE_KEY/JWT_PUBLIC_KEY or JWT_SECRET must be set")
                })?;
                if secret.len() < 32 {
                    anyhow::bail!("JWT_SECRET must be at least 32 bytes long");
                }
                SigningKeys::Secret(secret)
            }
        };

        let access_token_expiry = std::env::var("JWT_ACCESS_TOKEN_EXPIRY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(Self::DEFAULT_ACCESS_TOKEN_EXPIRY);

        let refresh_token_expiry = std::env::var("JWT_REFRESH_TOKEN_EXPIRY")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(Self::DEFAULT_REFRESH_TOKEN_EXPIRY);

        if access_token_expiry > Self::MAX_TOKEN_EXPIRY
            || refresh_token_expiry > Self::MAX_TOKEN_EXPIRY
        {
            anyhow::bail!(
                "JWT token expiry must not exceed {} seconds",
                Self::MAX_TOKEN_EXPIRY
            );
        }

        Ok(JwtConfig {
            keys,
            access_token_expiry,
            refresh_token_expiry,
        })
    }
}

fn lifetime(seconds: u64) -> Result<Duration> {
    duration_from_secs(seconds)
        .ok_or_else(|| anyhow::anyhow!("Token lifetime of {}s is out of range", seconds))
}

/// Inline PEM, or a path to a PEM file (tried from the CWD, then the crate root)
fn read_pem(value: &str) -> Result<String> {
    if value.starts_with("-----BEGIN") {
        return Ok(value.to_string());
    }

    let pem = std::fs::read_to_string(value)
        .or_else(|_| {
            let mut path = std::path::PathBuf::from(env!("CARGO_MANIFEST_DIR"));
            path.push(value);
            std::fs::read_to_string(path)
        })
        .map_err(|e| anyhow::anyhow!("Failed to read key file {}: {}", value, e))?;

    Ok(pem.trim().to_string())
}

/// What a token may be used for
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum TokenKind {
    Access,
    Refresh,
    /// Short-lived token scoped to a single named purpose
    Purpose(String),
}

impl From<TokenKind> for String {
    fn from(kind: TokenKind) -> Self {
        match kind {
            TokenKind::Access => "access".to_string(),
            TokenKind::Refresh => "refresh".to_string(),
            TokenKind::Purpose(name) => format!("purpose:{}", name),
        }
    }
}

impl TryFrom<String> for TokenKind {
    type Error = String;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        match value.as_str() {
            "access" => Ok(TokenKind::Access),
            "refresh" => Ok(TokenKind::Refresh),
            other => match other.strip_prefix("purpose:") {
                Some(name) if !name.is_empty() => Ok(TokenKind::Purpose(name.to_string())),
                _ => Err(format!("unknown token kind: {}", other)),
            },
        }
    }
}

/// JWT claims structure
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Claims {
    /// User ID
    pub sub: Uuid,
    pub email: String,
    pub role: Role,
    pub kind: TokenKind,
    /// Issued at, seconds since epoch
    pub iat: u64,
    /// Expiration, seconds since epoch
    pub exp: u64,
}

/// Why a token was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TokenError {
    #[error("token is malformed")]
    Malformed,
    #[error("token signature is invalid")]
    BadSignature,
    #[error("token has expired")]
    Expired,
    #[error("token has the wrong kind")]
    WrongKind,
}

/// Outcome of verifying a token
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verification {
    Valid(Claims),
    Invalid(TokenError),
}

impl Verification {
    pub fn is_valid(&self) -> bool {
        matches!(self, Verification::Valid(_))
    }

    pub fn claims(&self) -> Option<&Claims> {
        match self {
            Verification::Valid(claims) => Some(claims),
            Verification::Invalid(_) => None,
        }
    }

    pub fn error(&self) -> Option<TokenError> {
        match self {
            Verification::Valid(_) => None,
            Verification::Invalid(e) => Some(*e),
        }
    }

    pub fn into_result(self) -> Result<Claims, TokenError> {
        match self {
            Verification::Valid(claims) => Ok(claims),
            Verification::Invalid(e) => Err(e),
        }
    }
}

/// Extract the token from an `Authorization: Bearer <token>` header value
pub fn extract_bearer(header_value: Option<&str>) -> Option<&str> {
    let (scheme, token) = header_value?.trim().split_once(' ')?;
    let token = token.trim();
    if scheme.eq_ignore_ascii_case("bearer") && !token.is_empty() && !token.contains(' ') {
        Some(token)
    } else {
        None
    }
}

/// JWT service
#[derive(Clone)]
pub struct JwtService {
    algorithm: Algorithm,
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
    validation: Validation,
    config: JwtConfig,
    clock: Arc<dyn Clock>,
}

impl JwtService {
    /// Initialize a new JWT service
    pub fn new(config: JwtConfig, clock: Arc<dyn Clock>) -> Result<Self> {
        let (algorithm, encoding_key, decoding_key) = match &config.keys {
            SigningKeys::Rsa {
                private_key,
                public_key,
            } => (
                Algorithm::RS256,
                EncodingKey::from_rsa_pem(private_key.as_bytes())?,
                DecodingKey::from_rsa_pem(public_key.as_bytes())?,
            ),
            SigningKeys::Secret(secret) => (
                Algorithm::HS256,
                EncodingKey::from_secret(secret.as_bytes()),
                DecodingKey::from_secret(secret.as_bytes()),
            ),
        };

        // Expiry is compared against our own clock once the signature checks out.
        let mut validation = Validation::new(algorithm);
        validation.validate_exp = false;
        validation.leeway = 0;

        Ok(JwtService {
            algorithm,
            encoding_key,
            decoding_key,
            validation,
            config,
            clock,
        })
    }

    fn now_secs(&self) -> u64 {
        u64::try_from(self.clock.now().timestamp()).unwrap_or(0)
    }

    /// Sign a claims set for `subject` valid for `ttl`
    pub fn issue(
        &self,
        subject: Uuid,
        email: &str,
        role: Role,
        kind: TokenKind,
        ttl: Duration,
    ) -> Result<String> {
        let now = self.now_secs();
        let ttl = u64::try_from(ttl.num_seconds())
            .map_err(|_| anyhow::anyhow!("Token lifetime must not be negative"))?;

        let claims = Claims {
            sub: subject,
            email: email.to_string(),
            role,
            kind,
            iat: now,
            exp: now
                .checked_add(ttl)
                .ok_or_else(|| anyhow::anyhow!("Token lifetime overflows the clock"))?,
        };

        let token = encode(&Header::new(self.algorithm), &claims, &self.encoding_key)?;
        Ok(token)
    }

    /// Generate an access token for a user
    pub fn issue_access_token(&self, user: &User) -> Result<String> {
        self.issue(
            user.id,
            &user.email,
            user.role,
            TokenKind::Access,
            lifetime(self.config.access_token_expiry)?,
        )
    }

    /// Generate a refresh token for a user
    pub fn issue_refresh_token(&self, user: &User) -> Result<String> {
        self.issue(
            user.id,
            &user.email,
            user.role,
            TokenKind::Refresh,
            lifetime(self.config.refresh_token_expiry)?,
        )
    }

    /// Verify signature, payload shape and expiry
    pub fn verify(&self, token: &str) -> Verification {
        let claims = match decode::<Claims>(token, &self.decoding_key, &self.validation) {
            Ok(data) => data.claims,
            Err(e) => {
                debug!("Rejected token: {}", e);
                let reason = match e.kind() {
                    ErrorKind::InvalidSignature => TokenError::BadSignature,
                    ErrorKind::ExpiredSignature => TokenError::Expired,
                    _ => TokenError::Malformed,
                };
                return Verification::Invalid(reason);
            }
        };

        if self.now_secs() >= claims.exp {
            return Verification::Invalid(TokenError::Expired);
        }

        Verification::Valid(claims)
    }

    /// Verify a token and require it to be of `kind`
    pub fn verify_kind(&self, token: &str, kind: &TokenKind) -> Verification {
        match self.verify(token) {
            Verification::Valid(claims) if claims.kind != *kind => {
                Verification::Invalid(TokenError::WrongKind)
            }
            other => other,
        }
    }

    /// Get the access token expiry time
    pub fn access_token_expiry(&self) -> u64 {
        self.config.access_token_expiry
    }

    /// Get the refresh token expiry time
    pub fn refresh_token_expiry(&self) -> u64 {
        self.config.refresh_token_expiry
    }
}
