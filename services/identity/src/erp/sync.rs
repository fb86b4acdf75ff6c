//! Best-effort identity synchronization
//!
//! Every call here is bounded by a timeout and every failure is logged and
//! turned into a degraded answer. Nothing in this module returns an error to
//! the session flows.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use super::{ErpConfig, ErpError, ErpIdentity, ErpIdentityClient, ErpProfile};

/// What the ERP said about an email
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RemoteLookup {
    Exists(ErpIdentity),
    Missing,
    /// The ERP could not be asked; callers must not read this as `Missing`
    Unknown,
}

impl RemoteLookup {
    /// `true` only for a confirmed account; transport failure reads as `false`
    pub fn is_known_to_exist(&self) -> bool {
        matches!(self, RemoteLookup::Exists(_))
    }
}

/// Result of pushing a change to the ERP
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncOutcome {
    Synced,
    Failed,
    /// No ERP configured or nothing linked
    Skipped,
}

/// Timeout-bounded, failure-absorbing wrapper around an ERP client
#[derive(Clone)]
pub struct IdentitySynchronizer {
    client: Option<Arc<dyn ErpIdentityClient>>,
    timeout: Duration,
}

impl IdentitySynchronizer {
    pub fn new(client: Arc<dyn ErpIdentityClient>, timeout: Duration) -> Self {
        Self {
            client: Some(client),
            timeout,
        }
    }

    /// Synchronizer that never contacts an ERP
    pub fn disabled() -> Self {
        Self {
            client: None,
            timeout: Duration::from_secs(ErpConfig::DEFAULT_TIMEOUT_SECONDS),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    async fn bounded<T, F>(&self, call: F) -> Result<T, ErpError>
    where
        F: Future<Output = Result<T, ErpError>>,
    {
        tokio::time::timeout(self.timeout, call)
            .await
            .unwrap_or(Err(ErpError::Timeout))
    }

    /// Check credentials with the ERP; `None` on rejection or failure
    pub async fn authenticate(&self, email: &str, password: &str) -> Option<ErpIdentity> {
        let client = self.client.as_ref()?;
        match self.bounded(client.authenticate(email, password)).await {
            Ok(Some(identity)) => Some(identity),
            Ok(None) => {
                info!("ERP rejected credentials for {}", email);
                None
            }
            Err(e) => {
                warn!("ERP authentication unavailable for {}: {}", email, e);
                None
            }
        }
    }

    pub async fn exists_remote(&self, email: &str) -> RemoteLookup {
        let Some(client) = self.client.as_ref() else {
            return RemoteLookup::Unknown;
        };
        match self.bounded(client.find_user(email)).await {
            Ok(Some(identity)) => RemoteLookup::Exists(identity),
            Ok(None) => RemoteLookup::Missing,
            Err(e) => {
                warn!("ERP lookup failed for {}: {}", email, e);
                RemoteLookup::Unknown
            }
        }
    }

    /// Create the ERP account; returns its remote id
    pub async fn create_remote(&self, profile: &ErpProfile) -> Option<String> {
        let client = self.client.as_ref()?;
        match self.bounded(client.create_user(profile)).await {
            Ok(remote_id) => {
                info!("Created ERP account {} for {}", remote_id, profile.email);
                Some(remote_id)
            }
            Err(e) => {
                warn!("ERP account creation failed for {}: {}", profile.email, e);
                None
            }
        }
    }

    pub async fn update_password(&self, remote_id: &str, new_password: &str) -> SyncOutcome {
        let Some(client) = self.client.as_ref() else {
            return SyncOutcome::Skipped;
        };
        match self
            .bounded(client.update_password(remote_id, new_password))
            .await
        {
            Ok(()) => SyncOutcome::Synced,
            Err(e) => {
                warn!("ERP password update failed for {}: {}", remote_id, e);
                SyncOutcome::Failed
            }
        }
    }
}
