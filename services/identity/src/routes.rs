//! Identity service routes

use axum::{
    Extension, Json, Router,
    extract::State,
    middleware,
    response::IntoResponse,
    routing::{get, post},
};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::{
    AppState,
    erp::ErpIdentity,
    error::AuthError,
    jwt::Claims,
    middleware::require_access_token,
    models::UserSummary,
    reset::ResetMode,
};

/// Body returned for password-reset requests whether or not the email exists
const RESET_REQUESTED_MESSAGE: &str =
    "If an account exists for this email, instructions have been sent";

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LoginResponse {
    pub success: bool,
    pub user: UserSummary,
    pub token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_user: Option<ErpIdentity>,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupRequest {
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub password: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SignupResponse {
    pub success: bool,
    pub user: UserSummary,
    pub token: String,
    pub refresh_token: String,
    pub expires_in: u64,
}

#[derive(Deserialize)]
pub struct ResetRequest {
    #[serde(default)]
    pub email: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenResetRequest {
    #[serde(default)]
    pub token: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OtpResetRequest {
    #[serde(default)]
    pub email: String,
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenRequest {
    #[serde(default)]
    pub refresh_token: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RefreshTokenResponse {
    pub token: String,
    pub expires_in: u64,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChangePasswordRequest {
    #[serde(default)]
    pub current_password: String,
    #[serde(default)]
    pub new_password: String,
}

#[derive(Serialize)]
pub struct MessageResponse {
    pub success: bool,
    pub message: String,
}

impl MessageResponse {
    fn ok(message: &str) -> Json<Self> {
        Json(Self {
            success: true,
            message: message.to_string(),
        })
    }
}

#[derive(Serialize)]
pub struct CurrentUserResponse {
    pub success: bool,
    pub user: UserSummary,
}

/// Create the router for the identity service
pub fn create_router(state: AppState) -> Router {
    let authenticated = Router::new()
        .route("/auth/me", get(current_user))
        .route("/auth/password/change", post(change_password))
        .route_layer(middleware::from_fn_with_state(
            state.clone(),
            require_access_token,
        ));

    Router::new()
        .route("/health", get(health_check))
        .route("/auth/login", post(login))
        .route("/auth/signup", post(signup))
        .route("/auth/password/forgot", post(forgot_password))
        .route("/auth/otp/request", post(request_otp))
        .route("/auth/password/reset", post(reset_password))
        .route("/auth/otp/verify", post(verify_otp))
        .route("/auth/refresh", post(refresh_token))
        .merge(authenticated)
        .with_state(state)
}

/// Health check endpoint
pub async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({
        "status": "ok",
        "service": "identity"
    }))
}

pub async fn login(
    State(state): State<AppState>,
    Json(payload): Json<LoginRequest>,
) -> Result<Json<LoginResponse>, AuthError> {
    let outcome = state
        .session
        .login(&payload.email, &payload.password)
        .await?;

    Ok(Json(LoginResponse {
        success: true,
        user: outcome.user.summary(),
        token: outcome.tokens.access_token,
        refresh_token: outcome.tokens.refresh_token,
        expires_in: outcome.tokens.expires_in,
        external_user: outcome.external_user,
    }))
}

pub async fn signup(
    State(state): State<AppState>,
    Json(payload): Json<SignupRequest>,
) -> Result<Json<SignupResponse>, AuthError> {
    info!("Signup request");
    let outcome = state
        .session
        .signup(&payload.name, &payload.email, &payload.password)
        .await?;

    Ok(Json(SignupResponse {
        success: true,
        user: outcome.user.summary(),
        token: outcome.tokens.access_token,
        refresh_token: outcome.tokens.refresh_token,
        expires_in: outcome.tokens.expires_in,
    }))
}

/// Mail a reset link
pub async fn forgot_password(
    State(state): State<AppState>,
    Json(payload): Json<ResetRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state
        .session
        .request_password_reset(&payload.email, ResetMode::Token)
        .await?;
    Ok(MessageResponse::ok(RESET_REQUESTED_MESSAGE))
}

/// Mail a one-time reset code
pub async fn request_otp(
    State(state): State<AppState>,
    Json(payload): Json<ResetRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state
        .session
        .request_password_reset(&payload.email, ResetMode::Otp)
        .await?;
    Ok(MessageResponse::ok(RESET_REQUESTED_MESSAGE))
}

pub async fn reset_password(
    State(state): State<AppState>,
    Json(payload): Json<TokenResetRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state
        .session
        .reset_with_token(&payload.token, &payload.new_password)
        .await?;
    Ok(MessageResponse::ok("Password has been reset"))
}

pub async fn verify_otp(
    State(state): State<AppState>,
    Json(payload): Json<OtpResetRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state
        .session
        .reset_with_otp(&payload.email, &payload.code, &payload.new_password)
        .await?;
    Ok(MessageResponse::ok("Password has been reset"))
}

pub async fn refresh_token(
    State(state): State<AppState>,
    Json(payload): Json<RefreshTokenRequest>,
) -> Result<Json<RefreshTokenResponse>, AuthError> {
    let token = state.session.refresh(&payload.refresh_token).await?;

    Ok(Json(RefreshTokenResponse {
        token,
        expires_in: state.session.jwt().access_token_expiry(),
    }))
}

pub async fn current_user(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
) -> Result<Json<CurrentUserResponse>, AuthError> {
    let user = state.session.active_user(claims.sub).await?;

    Ok(Json(CurrentUserResponse {
        success: true,
        user: user.summary(),
    }))
}

pub async fn change_password(
    State(state): State<AppState>,
    Extension(claims): Extension<Claims>,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<Json<MessageResponse>, AuthError> {
    state
        .session
        .change_password(claims.sub, &payload.current_password, &payload.new_password)
        .await?;
    Ok(MessageResponse::ok("Password has been changed"))
}
