//! Error type surfaced by the identity flows

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use common::DatabaseError;
use thiserror::Error;

/// Errors returned by the session flows.
///
/// Messages are deliberately generic so responses never reveal whether an
/// account exists.
#[derive(Debug, Error)]
pub enum AuthError {
    #[error("{0}")]
    Validation(String),

    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Account is temporarily locked")]
    AccountLocked,

    #[error("Invalid or expired reset challenge")]
    InvalidOrExpiredChallenge,

    #[error("Account is inactive")]
    InactiveAccount,

    #[error("Invalid or expired token")]
    InvalidToken,

    #[error("Email is already registered")]
    EmailTaken,

    #[error("Internal server error")]
    Internal(#[from] anyhow::Error),
}

impl AuthError {
    pub fn kind(&self) -> &'static str {
        match self {
            AuthError::Validation(_) => "VALIDATION",
            AuthError::InvalidCredentials => "INVALID_CREDENTIALS",
            AuthError::AccountLocked => "ACCOUNT_LOCKED",
            AuthError::InvalidOrExpiredChallenge => "INVALID_OR_EXPIRED_CHALLENGE",
            AuthError::InactiveAccount => "INACTIVE_ACCOUNT",
            AuthError::InvalidToken => "INVALID_TOKEN",
            AuthError::EmailTaken => "EMAIL_TAKEN",
            AuthError::Internal(_) => "INTERNAL",
        }
    }

    pub fn status(&self) -> StatusCode {
        match self {
            AuthError::Validation(_) | AuthError::InvalidOrExpiredChallenge => {
                StatusCode::BAD_REQUEST
            }
            AuthError::InvalidCredentials | AuthError::InvalidToken => StatusCode::UNAUTHORIZED,
            AuthError::AccountLocked => StatusCode::LOCKED,
            AuthError::InactiveAccount => StatusCode::FORBIDDEN,
            AuthError::EmailTaken => StatusCode::CONFLICT,
            AuthError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<DatabaseError> for AuthError {
    fn from(err: DatabaseError) -> Self {
        AuthError::Internal(err.into())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        if let AuthError::Internal(ref e) = self {
            tracing::error!(error = %e, kind = "INTERNAL", "internal error");
        }

        let body = Json(serde_json::json!({
            "success": false,
            "kind": self.kind(),
            "message": self.to_string(),
        }));

        (self.status(), body).into_response()
    }
}
