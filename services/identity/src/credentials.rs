//! Credential verification and account lockout
//!
//! An identity is either unlocked or locked until some instant. While locked,
//! attempts are refused without touching the password hash. Each failed
//! attempt is counted by one atomic store update, which also applies the lock
//! once the configured threshold is reached. Attempts against the same
//! identity are serialized in-process so a burst of requests observes the
//! transitions in order.

use anyhow::{Result, anyhow};
use chrono::{DateTime, Duration, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OnceCell, OwnedMutexGuard};
use tracing::{info, warn};
use uuid::Uuid;

use crate::clock::{Clock, checked_after, duration_from_secs};
use crate::models::{User, UserWithSecret};
use crate::password::PasswordHasher;
use crate::repositories::UserStore;

/// Longest accepted lock, one year
pub const MAX_LOCK_DURATION_SECONDS: u64 = 31_536_000;

/// Lockout policy
#[derive(Debug, Clone)]
pub struct LockoutConfig {
    /// Consecutive failures that lock the account
    pub max_attempts: u32,
    /// How long a lock lasts, in seconds
    pub lock_duration_seconds: u64,
}

impl Default for LockoutConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            lock_duration_seconds: 1800, // 30 minutes
        }
    }
}

impl LockoutConfig {
    /// Create a new LockoutConfig from environment variables
    ///
    /// # Environment Variables
    /// - `LOCKOUT_MAX_ATTEMPTS`: failures before locking (default: 5)
    /// - `LOCKOUT_DURATION_SECONDS`: lock length in seconds (default: 1800, at most one year)
    pub fn from_env() -> Result<Self> {
        let defaults = Self::default();

        let max_attempts = std::env::var("LOCKOUT_MAX_ATTEMPTS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.max_attempts);

        if max_attempts == 0 {
            anyhow::bail!("LOCKOUT_MAX_ATTEMPTS must be at least 1");
        }

        let lock_duration_seconds = std::env::var("LOCKOUT_DURATION_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(defaults.lock_duration_seconds);

        if lock_duration_seconds > MAX_LOCK_DURATION_SECONDS {
            anyhow::bail!(
                "LOCKOUT_DURATION_SECONDS must not exceed {}",
                MAX_LOCK_DURATION_SECONDS
            );
        }

        Ok(Self {
            max_attempts,
            lock_duration_seconds,
        })
    }

    /// Lock length, or `None` when the configured seconds do not fit a duration
    pub fn lock_duration(&self) -> Option<Duration> {
        duration_from_secs(self.lock_duration_seconds)
    }
}

/// Result of checking a password
#[derive(Debug, Clone)]
pub enum CredentialOutcome {
    /// Password matched; the returned record has its counter reset
    Authenticated(User),
    /// Account is locked until the given instant
    Locked { until: DateTime<Utc> },
    InvalidCredentials,
}

/// Per-identity async mutexes, created on demand and dropped when idle
#[derive(Clone, Default)]
struct IdentityLocks {
    entries: Arc<Mutex<HashMap<Uuid, Arc<AsyncMutex<()>>>>>,
}

struct IdentityGuard {
    id: Uuid,
    locks: IdentityLocks,
    _guard: OwnedMutexGuard<()>,
}

impl IdentityLocks {
    async fn acquire(&self, id: Uuid) -> IdentityGuard {
        let mutex = {
            let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
            entries.entry(id).or_default().clone()
        };
        IdentityGuard {
            id,
            locks: self.clone(),
            _guard: mutex.lock_owned().await,
        }
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.entries.lock().unwrap_or_else(|e| e.into_inner()).len()
    }
}

impl Drop for IdentityGuard {
    fn drop(&mut self) {
        let mut entries = self.locks.entries.lock().unwrap_or_else(|e| e.into_inner());
        // One reference in the map, one held by this guard: nobody is waiting.
        if entries
            .get(&self.id)
            .is_some_and(|m| Arc::strong_count(m) <= 2)
        {
            entries.remove(&self.id);
        }
    }
}

/// Checks passwords and drives the lockout state machine
#[derive(Clone)]
pub struct CredentialVerifier {
    store: Arc<dyn UserStore>,
    hasher: PasswordHasher,
    config: LockoutConfig,
    clock: Arc<dyn Clock>,
    locks: IdentityLocks,
    decoy_hash: Arc<OnceCell<String>>,
}

impl CredentialVerifier {
    pub fn new(
        store: Arc<dyn UserStore>,
        hasher: PasswordHasher,
        config: LockoutConfig,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            store,
            hasher,
            config,
            clock,
            locks: IdentityLocks::default(),
            decoy_hash: Arc::new(OnceCell::new()),
        }
    }

    pub fn config(&self) -> &LockoutConfig {
        &self.config
    }

    pub fn hasher(&self) -> &PasswordHasher {
        &self.hasher
    }

    /// Check `password` for an account looked up by the caller
    pub async fn verify(&self, account: &UserWithSecret, password: &str) -> Result<CredentialOutcome> {
        let id = account.user.id;
        let _guard = self.locks.acquire(id).await;

        // The caller's copy may predate attempts or password changes that
        // held the guard before us.
        let Some(UserWithSecret {
            user: current,
            password_hash,
        }) = self.store.find_secret_by_id(id).await?
        else {
            return Ok(CredentialOutcome::InvalidCredentials);
        };

        let now = self.clock.now();
        if let Some(until) = current.locked_at(now) {
            info!("Rejected login for locked account {}", id);
            return Ok(CredentialOutcome::Locked { until });
        }

        if !self.hasher.verify(password, &password_hash).await? {
            return self.record_failure(id, now).await;
        }

        if !self.store.record_login_success(id, now).await? {
            // A writer outside this process locked the record meanwhile.
            let until = self
                .store
                .find_by_id(id)
                .await?
                .and_then(|u| u.locked_until)
                .unwrap_or(now);
            return Ok(CredentialOutcome::Locked { until });
        }

        let mut user = current;
        user.failed_login_attempts = 0;
        user.locked_until = None;
        user.last_login_at = Some(now);
        Ok(CredentialOutcome::Authenticated(user))
    }

    async fn record_failure(&self, id: Uuid, now: DateTime<Utc>) -> Result<CredentialOutcome> {
        let lock_until = checked_after(now, self.config.lock_duration_seconds).ok_or_else(|| {
            anyhow!(
                "lock duration of {}s overflows the clock",
                self.config.lock_duration_seconds
            )
        })?;
        let Some(state) = self
            .store
            .record_login_failure(id, now, self.config.max_attempts, lock_until)
            .await?
        else {
            return Ok(CredentialOutcome::InvalidCredentials);
        };

        match state.locked_until.filter(|until| now < *until) {
            Some(until) => {
                warn!(
                    "Locked account {} after {} failed attempts",
                    id, state.failed_login_attempts
                );
                Ok(CredentialOutcome::Locked { until })
            }
            None => Ok(CredentialOutcome::InvalidCredentials),
        }
    }

    /// Spend the cost of a hash check for an unknown account so response
    /// timing does not reveal whether the email is registered
    pub async fn reject_unknown(&self, password: &str) -> Result<CredentialOutcome> {
        let hasher = self.hasher.clone();
        let decoy = self
            .decoy_hash
            .get_or_try_init(|| async move { hasher.hash("decoy-password").await })
            .await?;
        self.hasher.verify(password, decoy).await?;
        Ok(CredentialOutcome::InvalidCredentials)
    }
}
