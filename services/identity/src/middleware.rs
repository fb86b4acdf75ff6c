//! Middleware for access token validation

use axum::{
    body::Body,
    extract::State,
    http::{Request, header::AUTHORIZATION},
    middleware::Next,
    response::Response,
};
use tracing::info;

use crate::{AppState, error::AuthError, jwt::extract_bearer};

/// Require a valid access token and expose its claims to the handler
pub async fn require_access_token(
    State(state): State<AppState>,
    mut req: Request<Body>,
    next: Next,
) -> Result<Response, AuthError> {
    let header = req
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok());

    let Some(token) = extract_bearer(header) else {
        info!("Request to {} without a bearer token", req.uri().path());
        return Err(AuthError::InvalidToken);
    };

    let claims = state.session.authorize(token)?;
    req.extensions_mut().insert(claims);

    Ok(next.run(req).await)
}
