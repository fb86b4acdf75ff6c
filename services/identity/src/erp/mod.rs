//! Bridge to the ERP identity store
//!
//! The ERP keeps its own user accounts. We try to keep them in step with the
//! local identities but never depend on it: the local store decides every
//! login, signup and password change, and the ERP is told afterwards when it
//! is reachable.

pub mod http;
pub mod sync;

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use std::fmt;
use std::time::Duration;
use thiserror::Error;

pub use http::HttpErpClient;
pub use sync::{IdentitySynchronizer, RemoteLookup, SyncOutcome};

/// ERP account linked to a local identity
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ErpIdentity {
    /// Stable id of the account in the ERP
    pub remote_id: String,
    pub email: String,
    pub full_name: Option<String>,
}

/// Data needed to create an ERP account
#[derive(Clone)]
pub struct ErpProfile {
    pub name: String,
    pub email: String,
    pub password: String,
}

impl fmt::Debug for ErpProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErpProfile")
            .field("name", &self.name)
            .field("email", &self.email)
            .finish_non_exhaustive()
    }
}

/// Failure talking to the ERP
#[derive(Debug, Error)]
pub enum ErpError {
    #[error("ERP transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("ERP answered with status {0}")]
    Status(u16),

    #[error("Unexpected ERP response: {0}")]
    Protocol(String),

    #[error("ERP call timed out")]
    Timeout,
}

/// Identity operations offered by the ERP
#[async_trait]
pub trait ErpIdentityClient: Send + Sync {
    /// Check credentials against the ERP. `Ok(None)` means the ERP rejected them.
    async fn authenticate(&self, email: &str, password: &str)
    -> Result<Option<ErpIdentity>, ErpError>;

    async fn find_user(&self, email: &str) -> Result<Option<ErpIdentity>, ErpError>;

    /// Create an account and return its remote id
    async fn create_user(&self, profile: &ErpProfile) -> Result<String, ErpError>;

    async fn update_password(&self, remote_id: &str, new_password: &str) -> Result<(), ErpError>;
}

/// ERP connection settings
#[derive(Clone)]
pub struct ErpConfig {
    pub base_url: String,
    pub api_key: String,
    pub api_secret: String,
    /// Upper bound for any single ERP call, in seconds
    pub timeout_seconds: u64,
}

impl fmt::Debug for ErpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ErpConfig")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key)
            .field("timeout_seconds", &self.timeout_seconds)
            .finish_non_exhaustive()
    }
}

impl ErpConfig {
    pub const DEFAULT_TIMEOUT_SECONDS: u64 = 5;

    /// Create a new ErpConfig from environment variables.
    ///
    /// Returns `None` when `ERP_BASE_URL` is unset, which disables the bridge.
    ///
    /// # Environment Variables
    /// - `ERP_BASE_URL`: ERP root URL
    /// - `ERP_API_KEY` / `ERP_API_SECRET`: service credentials for account administration
    /// - `ERP_TIMEOUT_SECONDS`: per-call timeout (default: 5)
    pub fn from_env() -> Result<Option<Self>> {
        let Ok(base_url) = std::env::var("ERP_BASE_URL") else {
            return Ok(None);
        };
        if base_url.trim().is_empty() {
            return Ok(None);
        }

        let api_key = std::env::var("ERP_API_KEY")
            .map_err(|_| anyhow::anyhow!("ERP_API_KEY must be set when ERP_BASE_URL is"))?;
        let api_secret = std::env::var("ERP_API_SECRET")
            .map_err(|_| anyhow::anyhow!("ERP_API_SECRET must be set when ERP_BASE_URL is"))?;

        let timeout_seconds = std::env::var("ERP_TIMEOUT_SECONDS")
            .ok()
            .and_then(|s| s.parse().ok())
            .filter(|t| *t > 0)
            .unwrap_or(Self::DEFAULT_TIMEOUT_SECONDS);

        Ok(Some(Self {
            base_url: base_url.trim().to_string(),
            api_key,
            api_secret,
            timeout_seconds,
        }))
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}
