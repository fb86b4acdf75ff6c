//! In-memory identity store
//!
//! Every operation takes the map lock for its whole read-modify-write, which
//! gives the same per-record atomicity as the SQL statements in
//! [`UserRepository`](super::UserRepository).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{DatabaseError, DatabaseResult};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::UserStore;
use crate::models::{FailedLogin, NewUser, ResetChallenge, User, UserWithSecret, normalize_email};

#[derive(Debug, Clone)]
struct StoredUser {
    user: User,
    password_hash: String,
}

/// Identity store kept in process memory
#[derive(Debug, Clone, Default)]
pub struct MemoryUserStore {
    users: Arc<Mutex<HashMap<Uuid, StoredUser>>>,
}

impl MemoryUserStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored identities
    pub async fn len(&self) -> usize {
        self.users.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.users.lock().await.is_empty()
    }

    /// Apply `f` to a stored record, for seeding test fixtures
    pub async fn update_with<F>(&self, id: Uuid, f: F) -> bool
    where
        F: FnOnce(&mut User),
    {
        match self.users.lock().await.get_mut(&id) {
            Some(stored) => {
                f(&mut stored.user);
                true
            }
            None => false,
        }
    }
}

fn email_matches(user: &User, email: &str) -> bool {
    normalize_email(&user.email) == normalize_email(email)
}

#[async_trait]
impl UserStore for MemoryUserStore {
    async fn find_by_email(&self, email: &str) -> DatabaseResult<Option<User>> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|s| email_matches(&s.user, email))
            .map(|s| s.user.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<User>> {
        Ok(self.users.lock().await.get(&id).map(|s| s.user.clone()))
    }

    async fn find_secret_by_email(&self, email: &str) -> DatabaseResult<Option<UserWithSecret>> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|s| email_matches(&s.user, email))
            .map(|s| UserWithSecret {
                user: s.user.clone(),
                password_hash: s.password_hash.clone(),
            }))
    }

    async fn find_secret_by_id(&self, id: Uuid) -> DatabaseResult<Option<UserWithSecret>> {
        Ok(self.users.lock().await.get(&id).map(|s| UserWithSecret {
            user: s.user.clone(),
            password_hash: s.password_hash.clone(),
        }))
    }

    async fn find_by_reset_token_hash(&self, token_hash: &str) -> DatabaseResult<Option<User>> {
        let users = self.users.lock().await;
        Ok(users
            .values()
            .find(|s| {
                matches!(
                    &s.user.reset_challenge,
                    Some(ResetChallenge::Token { token_hash: stored, .. }) if stored == token_hash
                )
            })
            .map(|s| s.user.clone()))
    }

    async fn create(&self, new_user: &NewUser) -> DatabaseResult<User> {
        let mut users = self.users.lock().await;
        if users
            .values()
            .any(|s| email_matches(&s.user, &new_user.email))
        {
            return Err(DatabaseError::Conflict(format!(
                "email {} already exists",
                new_user.email
            )));
        }

        let now = Utc::now();
        let user = User {
            id: Uuid::new_v4(),
            name: new_user.name.clone(),
            email: new_user.email.clone(),
            role: new_user.role,
            is_active: true,
            external_ref: new_user.external_ref.clone(),
            failed_login_attempts: 0,
            locked_until: None,
            last_login_at: None,
            reset_challenge: None,
            created_at: now,
            updated_at: now,
        };
        users.insert(
            user.id,
            StoredUser {
                user: user.clone(),
                password_hash: new_user.password_hash.clone(),
            },
        );
        Ok(user)
    }

    async fn set_external_ref(&self, id: Uuid, external_ref: &str) -> DatabaseResult<()> {
        if let Some(stored) = self.users.lock().await.get_mut(&id) {
            stored.user.external_ref = Some(external_ref.to_string());
            stored.user.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn record_login_failure(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        max_attempts: u32,
        lock_until: DateTime<Utc>,
    ) -> DatabaseResult<Option<FailedLogin>> {
        let mut users = self.users.lock().await;
        let Some(stored) = users.get_mut(&id) else {
            return Ok(None);
        };
        let user = &mut stored.user;

        if user.locked_until.is_some_and(|until| until <= now) {
            user.locked_until = None;
            user.failed_login_attempts = 0;
        }

        user.failed_login_attempts = user.failed_login_attempts.saturating_add(1);
        if user.failed_login_attempts >= max_attempts {
            user.locked_until = Some(lock_until);
        }
        user.updated_at = now;

        Ok(Some(FailedLogin {
            failed_login_attempts: user.failed_login_attempts,
            locked_until: user.locked_until,
        }))
    }

    async fn record_login_success(&self, id: Uuid, now: DateTime<Utc>) -> DatabaseResult<bool> {
        let mut users = self.users.lock().await;
        let Some(stored) = users.get_mut(&id) else {
            return Ok(false);
        };
        let user = &mut stored.user;

        if user.locked_at(now).is_some() {
            return Ok(false);
        }

        user.failed_login_attempts = 0;
        user.locked_until = None;
        user.last_login_at = Some(now);
        user.updated_at = now;
        Ok(true)
    }

    async fn set_reset_challenge(
        &self,
        id: Uuid,
        challenge: &ResetChallenge,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        if let Some(stored) = self.users.lock().await.get_mut(&id) {
            stored.user.reset_challenge = Some(challenge.clone());
            stored.user.updated_at = now;
        }
        Ok(())
    }

    async fn complete_reset(
        &self,
        id: Uuid,
        expected: &ResetChallenge,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let mut users = self.users.lock().await;
        let Some(stored) = users.get_mut(&id) else {
            return Ok(false);
        };

        let still_pending = stored.user.reset_challenge.as_ref().is_some_and(|current| {
            current.kind() == expected.kind() && current.secret() == expected.secret()
        });
        if !still_pending {
            return Ok(false);
        }

        stored.password_hash = password_hash.to_string();
        stored.user.reset_challenge = None;
        stored.user.failed_login_attempts = 0;
        stored.user.locked_until = None;
        stored.user.updated_at = now;
        Ok(true)
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        if let Some(stored) = self.users.lock().await.get_mut(&id) {
            stored.password_hash = password_hash.to_string();
            stored.user.reset_challenge = None;
            stored.user.updated_at = now;
        }
        Ok(())
    }
}
