//! Identity store
//!
//! [`UserStore`] is the system of record for identities. Every mutation that
//! participates in a security decision is a single atomic operation on one
//! record, so concurrent requests cannot lose updates.

pub mod memory;
pub mod user;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::DatabaseResult;
use uuid::Uuid;

use crate::models::{FailedLogin, NewUser, ResetChallenge, User, UserWithSecret};

pub use memory::MemoryUserStore;
pub use user::UserRepository;

/// Persistence contract for identity records.
///
/// Emails passed in are already normalized with
/// [`normalize_email`](crate::models::normalize_email).
#[async_trait]
pub trait UserStore: Send + Sync {
    async fn find_by_email(&self, email: &str) -> DatabaseResult<Option<User>>;

    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<User>>;

    /// Privileged read that includes the password hash
    async fn find_secret_by_email(&self, email: &str) -> DatabaseResult<Option<UserWithSecret>>;

    async fn find_secret_by_id(&self, id: Uuid) -> DatabaseResult<Option<UserWithSecret>>;

    /// Find the owner of a pending token-mode challenge by its digest
    async fn find_by_reset_token_hash(&self, token_hash: &str) -> DatabaseResult<Option<User>>;

    /// Insert a new identity; a duplicate email yields `DatabaseError::Conflict`
    async fn create(&self, new_user: &NewUser) -> DatabaseResult<User>;

    async fn set_external_ref(&self, id: Uuid, external_ref: &str) -> DatabaseResult<()>;

    /// Count a failed login in one read-modify-write.
    ///
    /// A lock that already elapsed at `now` is discarded and counting starts
    /// over. When the new count reaches `max_attempts` the record is locked
    /// until `lock_until`.
    async fn record_login_failure(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        max_attempts: u32,
        lock_until: DateTime<Utc>,
    ) -> DatabaseResult<Option<FailedLogin>>;

    /// Reset the failure counter and stamp the login time.
    ///
    /// Returns `false` without writing when the record is locked at `now`.
    async fn record_login_success(&self, id: Uuid, now: DateTime<Utc>) -> DatabaseResult<bool>;

    /// Replace the pending reset slot
    async fn set_reset_challenge(
        &self,
        id: Uuid,
        challenge: &ResetChallenge,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()>;

    /// Set the password and clear the pending slot, but only while the slot
    /// still holds `expected`. Returns whether the write happened.
    async fn complete_reset(
        &self,
        id: Uuid,
        expected: &ResetChallenge,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool>;

    /// Set the password unconditionally; any pending reset is dropped
    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()>;
}
