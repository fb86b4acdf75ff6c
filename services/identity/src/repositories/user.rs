//! User repository for database operations

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use common::{DatabaseError, DatabaseResult};
use sqlx::{PgPool, Row, postgres::PgRow};
use tracing::{debug, info};
use uuid::Uuid;

use super::UserStore;
use crate::models::{FailedLogin, NewUser, ResetChallenge, Role, User, UserWithSecret};

const USER_COLUMNS: &str = "id, name, email, role, is_active, external_ref, \
     failed_login_attempts, locked_until, last_login_at, \
     reset_kind, reset_secret, reset_expires_at, created_at, updated_at";

/// PostgreSQL-backed user repository
#[derive(Clone)]
pub struct UserRepository {
    pool: PgPool,
}

impl UserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Apply the embedded schema migrations
    pub async fn migrate(&self) -> DatabaseResult<()> {
        info!("Running identity store migrations");
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| DatabaseError::Migration(e.to_string()))
    }

    async fn find_one(&self, filter: &str, value: &str) -> DatabaseResult<Option<User>> {
        let sql = format!("SELECT {} FROM users WHERE {}", USER_COLUMNS, filter);
        let row = sqlx::query(&sql)
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        row.as_ref().map(user_from_row).transpose()
    }
}

fn user_from_row(row: &PgRow) -> DatabaseResult<User> {
    let role: String = row.get("role");
    let role = role
        .parse::<Role>()
        .map_err(|e| DatabaseError::Query(sqlx::Error::Decode(e.into())))?;

    let reset_kind: Option<String> = row.get("reset_kind");
    let reset_challenge = ResetChallenge::from_parts(
        reset_kind.as_deref(),
        row.get("reset_secret"),
        row.get("reset_expires_at"),
    );

    let failed_login_attempts: i32 = row.get("failed_login_attempts");

    Ok(User {
        id: row.get("id"),
        name: row.get("name"),
        email: row.get("email"),
        role,
        is_active: row.get("is_active"),
        external_ref: row.get("external_ref"),
        failed_login_attempts: u32::try_from(failed_login_attempts).unwrap_or(0),
        locked_until: row.get("locked_until"),
        last_login_at: row.get("last_login_at"),
        reset_challenge,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn secret_from_row(row: &PgRow) -> DatabaseResult<UserWithSecret> {
    Ok(UserWithSecret {
        user: user_from_row(row)?,
        password_hash: row.get("password_hash"),
    })
}

#[async_trait]
impl UserStore for UserRepository {
    async fn find_by_email(&self, email: &str) -> DatabaseResult<Option<User>> {
        debug!("Finding user by email: {}", email);
        self.find_one("LOWER(email) = LOWER($1)", email).await
    }

    async fn find_by_id(&self, id: Uuid) -> DatabaseResult<Option<User>> {
        debug!("Finding user by ID: {}", id);

        let sql = format!("SELECT {} FROM users WHERE id = $1", USER_COLUMNS);
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        row.as_ref().map(user_from_row).transpose()
    }

    async fn find_secret_by_email(&self, email: &str) -> DatabaseResult<Option<UserWithSecret>> {
        let sql = format!(
            "SELECT {}, password_hash FROM users WHERE LOWER(email) = LOWER($1)",
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(email)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        row.as_ref().map(secret_from_row).transpose()
    }

    async fn find_secret_by_id(&self, id: Uuid) -> DatabaseResult<Option<UserWithSecret>> {
        let sql = format!(
            "SELECT {}, password_hash FROM users WHERE id = $1",
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;

        row.as_ref().map(secret_from_row).transpose()
    }

    async fn find_by_reset_token_hash(&self, token_hash: &str) -> DatabaseResult<Option<User>> {
        self.find_one("reset_kind = 'token' AND reset_secret = $1", token_hash)
            .await
    }

    async fn create(&self, new_user: &NewUser) -> DatabaseResult<User> {
        info!("Creating new user: {}", new_user.email);

        let sql = format!(
            r#"
            INSERT INTO users (id, name, email, password_hash, role, external_ref)
            VALUES ($1, $2, $3, $4, $5, $6)
            RETURNING {}
            "#,
            USER_COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::new_v4())
            .bind(&new_user.name)
            .bind(&new_user.email)
            .bind(&new_user.password_hash)
            .bind(new_user.role.as_str())
            .bind(&new_user.external_ref)
            .fetch_one(&self.pool)
            .await
            .map_err(DatabaseError::from_query)?;

        user_from_row(&row)
    }

    async fn set_external_ref(&self, id: Uuid, external_ref: &str) -> DatabaseResult<()> {
        sqlx::query("UPDATE users SET external_ref = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(external_ref)
            .execute(&self.pool)
            .await
            .map_err(DatabaseError::Query)?;
        Ok(())
    }

    async fn record_login_failure(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
        max_attempts: u32,
        lock_until: DateTime<Utc>,
    ) -> DatabaseResult<Option<FailedLogin>> {
        // SET expressions see the pre-update row, so the count is computed
        // twice from the same snapshot.
        let row = sqlx::query(
            r#"
            UPDATE users SET
                failed_login_attempts = CASE
                    WHEN locked_until IS NOT NULL AND locked_until <= $2 THEN 1
                    ELSE failed_login_attempts + 1
                END,
                locked_until = CASE
                    WHEN (CASE
                            WHEN locked_until IS NOT NULL AND locked_until <= $2 THEN 1
                            ELSE failed_login_attempts + 1
                          END) >= $3 THEN $4
                    WHEN locked_until IS NOT NULL AND locked_until <= $2 THEN NULL
                    ELSE locked_until
                END,
                updated_at = $2
            WHERE id = $1
            RETURNING failed_login_attempts, locked_until
            "#,
        )
        .bind(id)
        .bind(now)
        .bind(i32::try_from(max_attempts).unwrap_or(i32::MAX))
        .bind(lock_until)
        .fetch_optional(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(row.map(|row| {
            let attempts: i32 = row.get("failed_login_attempts");
            FailedLogin {
                failed_login_attempts: u32::try_from(attempts).unwrap_or(0),
                locked_until: row.get("locked_until"),
            }
        }))
    }

    async fn record_login_success(&self, id: Uuid, now: DateTime<Utc>) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET failed_login_attempts = 0, locked_until = NULL, last_login_at = $2, updated_at = $2
            WHERE id = $1 AND (locked_until IS NULL OR locked_until <= $2)
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(result.rows_affected() == 1)
    }

    async fn set_reset_challenge(
        &self,
        id: Uuid,
        challenge: &ResetChallenge,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET reset_kind = $2, reset_secret = $3, reset_expires_at = $4, updated_at = $5
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(challenge.kind())
        .bind(challenge.secret())
        .bind(challenge.expires_at())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::from_query)?;
        Ok(())
    }

    async fn complete_reset(
        &self,
        id: Uuid,
        expected: &ResetChallenge,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $4,
                reset_kind = NULL, reset_secret = NULL, reset_expires_at = NULL,
                failed_login_attempts = 0, locked_until = NULL,
                updated_at = $5
            WHERE id = $1 AND reset_kind = $2 AND reset_secret = $3
            "#,
        )
        .bind(id)
        .bind(expected.kind())
        .bind(expected.secret())
        .bind(password_hash)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;

        Ok(result.rows_affected() == 1)
    }

    async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        now: DateTime<Utc>,
    ) -> DatabaseResult<()> {
        sqlx::query(
            r#"
            UPDATE users
            SET password_hash = $2,
                reset_kind = NULL, reset_secret = NULL, reset_expires_at = NULL,
                updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(DatabaseError::Query)?;
        Ok(())
    }
}
