//! Session flows: login, signup, password reset, refresh
//!
//! [`SessionService`] composes the credential verifier, the reset challenge
//! manager, the ERP synchronizer and the token codec. The local store decides
//! every outcome; the ERP and the notifier are consulted afterwards and their
//! failures are logged, never returned.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::Clock;
use crate::credentials::{CredentialOutcome, CredentialVerifier, LockoutConfig};
use crate::erp::{ErpIdentity, ErpProfile, IdentitySynchronizer, RemoteLookup, SyncOutcome};
use crate::error::AuthError;
use crate::jwt::{Claims, JwtService, TokenKind};
use crate::models::{NewUser, Role, User, normalize_email};
use crate::notifier::Notifier;
use crate::password::PasswordHasher;
use crate::repositories::UserStore;
use crate::reset::{ResetChallengeManager, ResetConfig, ResetMode};
use crate::validation;

const NOTIFY_TIMEOUT: Duration = Duration::from_secs(10);

/// Policy knobs for the session flows
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    pub lockout: LockoutConfig,
    pub reset: ResetConfig,
}

/// Access/refresh pair handed to a client
#[derive(Clone)]
pub struct SessionTokens {
    pub access_token: String,
    pub refresh_token: String,
    /// Access token lifetime in seconds
    pub expires_in: u64,
}

impl std::fmt::Debug for SessionTokens {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionTokens")
            .field("expires_in", &self.expires_in)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone)]
pub struct LoginOutcome {
    pub user: User,
    pub tokens: SessionTokens,
    /// ERP account that accepted the same credentials, if any
    pub external_user: Option<ErpIdentity>,
}

#[derive(Debug, Clone)]
pub struct SignupOutcome {
    pub user: User,
    pub tokens: SessionTokens,
}

/// Orchestrates the identity flows over injected collaborators
#[derive(Clone)]
pub struct SessionService {
    store: Arc<dyn UserStore>,
    notifier: Arc<dyn Notifier>,
    erp: IdentitySynchronizer,
    jwt: JwtService,
    hasher: PasswordHasher,
    credentials: CredentialVerifier,
    resets: ResetChallengeManager,
    clock: Arc<dyn Clock>,
}

impl SessionService {
    pub fn new(
        store: Arc<dyn UserStore>,
        notifier: Arc<dyn Notifier>,
        erp: IdentitySynchronizer,
        jwt: JwtService,
        hasher: PasswordHasher,
        config: SessionConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let credentials = CredentialVerifier::new(
            store.clone(),
            hasher.clone(),
            config.lockout,
            clock.clone(),
        );
        let resets =
            ResetChallengeManager::new(store.clone(), hasher.clone(), config.reset, clock.clone());

        Self {
            store,
            notifier,
            erp,
            jwt,
            hasher,
            credentials,
            resets,
            clock,
        }
    }

    pub fn jwt(&self) -> &JwtService {
        &self.jwt
    }

    /// Check email and password, then mint a session
    pub async fn login(&self, email: &str, password: &str) -> Result<LoginOutcome, AuthError> {
        validation::validate_email(email).map_err(AuthError::Validation)?;
        validation::require_password(password).map_err(AuthError::Validation)?;
        let email = normalize_email(email);

        let Some(account) = self.store.find_secret_by_email(&email).await? else {
            self.credentials.reject_unknown(password).await?;
            info!("Login failed: no account for {}", email);
            return Err(AuthError::InvalidCredentials);
        };

        let mut user = match self.credentials.verify(&account, password).await? {
            CredentialOutcome::Authenticated(user) => user,
            CredentialOutcome::Locked { until } => {
                info!("Login refused for {}: locked until {}", email, until);
                return Err(AuthError::AccountLocked);
            }
            CredentialOutcome::InvalidCredentials => {
                info!("Login failed: wrong password for {}", email);
                return Err(AuthError::InvalidCredentials);
            }
        };

        if !user.is_active {
            info!("Login refused for inactive account {}", user.id);
            return Err(AuthError::InactiveAccount);
        }

        let external_user = self.erp.authenticate(&email, password).await;
        if let Some(remote) = &external_user {
            self.link_remote(&mut user, remote).await;
        }

        let tokens = self.issue_tokens(&user)?;
        info!("User {} logged in", user.id);

        Ok(LoginOutcome {
            user,
            tokens,
            external_user,
        })
    }

    /// Record the ERP account on an unlinked identity
    async fn link_remote(&self, user: &mut User, remote: &ErpIdentity) {
        match user.external_ref.as_deref() {
            Some(current) if current == remote.remote_id => {}
            Some(current) => warn!(
                "User {} is linked to ERP account {} but the ERP answered as {}",
                user.id, current, remote.remote_id
            ),
            None => match self.store.set_external_ref(user.id, &remote.remote_id).await {
                Ok(()) => {
                    info!("Linked user {} to ERP account {}", user.id, remote.remote_id);
                    user.external_ref = Some(remote.remote_id.clone());
                }
                Err(e) => warn!("Failed to store ERP link for user {}: {}", user.id, e),
            },
        }
    }

    /// Create a local identity and mint a session
    pub async fn signup(
        &self,
        name: &str,
        email: &str,
        password: &str,
    ) -> Result<SignupOutcome, AuthError> {
        validation::validate_name(name).map_err(AuthError::Validation)?;
        validation::validate_email(email).map_err(AuthError::Validation)?;
        validation::validate_password(password).map_err(AuthError::Validation)?;
        let name = name.trim();
        let email = normalize_email(email);

        if self.store.find_by_email(&email).await?.is_some() {
            return Err(AuthError::EmailTaken);
        }

        // An existing ERP account is only linked once its credentials have
        // been proven at login.
        let external_ref = match self.erp.exists_remote(&email).await {
            RemoteLookup::Missing => {
                let profile = ErpProfile {
                    name: name.to_string(),
                    email: email.clone(),
                    password: password.to_string(),
                };
                self.erp.create_remote(&profile).await
            }
            RemoteLookup::Exists(remote) => {
                info!(
                    "ERP account {} already exists for {}; linking deferred to login",
                    remote.remote_id, email
                );
                None
            }
            RemoteLookup::Unknown => None,
        };

        let password_hash = self.hasher.hash(password).await?;
        let user = self
            .store
            .create(&NewUser {
                name: name.to_string(),
                email,
                password_hash,
                role: Role::User,
                external_ref,
            })
            .await
            .map_err(|e| {
                if e.is_conflict() {
                    AuthError::EmailTaken
                } else {
                    e.into()
                }
            })?;
        info!("Created user {}", user.id);

        self.notify("welcome", self.notifier.send_welcome(&user.email, &user.name))
            .await;

        let tokens = self.issue_tokens(&user)?;
        Ok(SignupOutcome { user, tokens })
    }

    /// Issue a reset challenge and hand it to the notifier.
    ///
    /// Succeeds whether or not the email belongs to an account.
    pub async fn request_password_reset(
        &self,
        email: &str,
        mode: ResetMode,
    ) -> Result<(), AuthError> {
        validation::validate_email(email).map_err(AuthError::Validation)?;
        let email = normalize_email(email);

        let Some(user) = self.store.find_by_email(&email).await? else {
            info!("Password reset requested for unknown email {}", email);
            return Ok(());
        };
        if !user.is_active {
            info!("Password reset requested for inactive account {}", user.id);
            return Ok(());
        }

        let issued = self.resets.issue(&user, mode).await?;
        match mode {
            ResetMode::Token => {
                self.notify(
                    "reset link",
                    self.notifier.send_reset(&user.email, &issued.secret, &user.name),
                )
                .await
            }
            ResetMode::Otp => {
                self.notify(
                    "reset code",
                    self.notifier.send_otp(&user.email, &issued.secret, &user.name),
                )
                .await
            }
        }

        Ok(())
    }

    /// Redeem a mailed reset token
    pub async fn reset_with_token(&self, token: &str, new_password: &str) -> Result<(), AuthError> {
        validation::validate_reset_token(token).map_err(AuthError::Validation)?;
        validation::validate_password(new_password).map_err(AuthError::Validation)?;

        let user = self.resets.redeem_token(token, new_password).await?;
        self.push_password(&user, new_password).await;
        Ok(())
    }

    /// Redeem a one-time reset code
    pub async fn reset_with_otp(
        &self,
        email: &str,
        code: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        validation::validate_email(email).map_err(AuthError::Validation)?;
        validation::validate_otp_code(code).map_err(AuthError::Validation)?;
        validation::validate_password(new_password).map_err(AuthError::Validation)?;

        let user = self
            .resets
            .redeem_otp(&normalize_email(email), code, new_password)
            .await?;
        self.push_password(&user, new_password).await;
        Ok(())
    }

    /// Change the password of an authenticated user
    pub async fn change_password(
        &self,
        user_id: Uuid,
        current_password: &str,
        new_password: &str,
    ) -> Result<(), AuthError> {
        validation::require_password(current_password).map_err(AuthError::Validation)?;
        validation::validate_password(new_password).map_err(AuthError::Validation)?;

        let user = self.active_user(user_id).await?;
        let account = self
            .store
            .find_secret_by_email(&user.email)
            .await?
            .ok_or(AuthError::InvalidToken)?;

        let user = match self.credentials.verify(&account, current_password).await? {
            CredentialOutcome::Authenticated(user) => user,
            CredentialOutcome::Locked { .. } => return Err(AuthError::AccountLocked),
            CredentialOutcome::InvalidCredentials => return Err(AuthError::InvalidCredentials),
        };

        let password_hash = self.hasher.hash(new_password).await?;
        self.store
            .update_password(user.id, &password_hash, self.clock.now())
            .await?;
        info!("Password changed for user {}", user.id);

        self.push_password(&user, new_password).await;
        Ok(())
    }

    /// Trade a refresh token for a new access token.
    ///
    /// The refresh token itself is not rotated.
    pub async fn refresh(&self, refresh_token: &str) -> Result<String, AuthError> {
        if refresh_token.trim().is_empty() {
            return Err(AuthError::Validation("Refresh token is required".to_string()));
        }

        let claims = self
            .jwt
            .verify_kind(refresh_token.trim(), &TokenKind::Refresh)
            .into_result()
            .map_err(|e| {
                info!("Refresh rejected: {}", e);
                AuthError::InvalidToken
            })?;

        let user = self.active_user(claims.sub).await?;
        Ok(self.jwt.issue_access_token(&user)?)
    }

    /// Verify an access token presented on a request
    pub fn authorize(&self, access_token: &str) -> Result<Claims, AuthError> {
        self.jwt
            .verify_kind(access_token, &TokenKind::Access)
            .into_result()
            .map_err(|e| {
                info!("Access token rejected: {}", e);
                AuthError::InvalidToken
            })
    }

    /// Load the identity behind verified claims
    pub async fn active_user(&self, user_id: Uuid) -> Result<User, AuthError> {
        let user = self
            .store
            .find_by_id(user_id)
            .await?
            .ok_or(AuthError::InvalidToken)?;
        if !user.is_active {
            return Err(AuthError::InactiveAccount);
        }
        Ok(user)
    }

    fn issue_tokens(&self, user: &User) -> Result<SessionTokens, AuthError> {
        Ok(SessionTokens {
            access_token: self.jwt.issue_access_token(user)?,
            refresh_token: self.jwt.issue_refresh_token(user)?,
            expires_in: self.jwt.access_token_expiry(),
        })
    }

    /// Best-effort password push to the linked ERP account
    async fn push_password(&self, user: &User, new_password: &str) -> SyncOutcome {
        let Some(remote_id) = user.external_ref.as_deref() else {
            return SyncOutcome::Skipped;
        };
        let outcome = self.erp.update_password(remote_id, new_password).await;
        if outcome == SyncOutcome::Failed {
            warn!(
                "ERP password for user {} is stale until the next successful sync",
                user.id
            );
        }
        outcome
    }

    async fn notify<F>(&self, what: &str, send: F)
    where
        F: Future<Output = anyhow::Result<()>>,
    {
        match tokio::time::timeout(NOTIFY_TIMEOUT, send).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => warn!("Failed to send {} notification: {}", what, e),
            Err(_) => warn!("Sending {} notification timed out", what),
        }
    }
}
