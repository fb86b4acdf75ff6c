//! Outbound account notifications
//!
//! Templated email delivery lives outside this service. The session flows
//! only hand over the data a message needs and never fail because delivery
//! did.

use anyhow::Result;
use async_trait::async_trait;
use tracing::info;

/// Delivery channel for account emails
#[async_trait]
pub trait Notifier: Send + Sync {
    /// Password-reset link carrying the raw token
    async fn send_reset(&self, email: &str, token: &str, name: &str) -> Result<()>;

    /// Password-reset one-time code
    async fn send_otp(&self, email: &str, code: &str, name: &str) -> Result<()>;

    async fn send_welcome(&self, email: &str, name: &str) -> Result<()>;
}

/// Notifier that only records delivery intent in the log.
///
/// Secrets are not written out.
#[derive(Debug, Clone, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_reset(&self, email: &str, _token: &str, name: &str) -> Result<()> {
        info!(to = %email, name = %name, "Password reset link ready for delivery");
        Ok(())
    }

    async fn send_otp(&self, email: &str, _code: &str, name: &str) -> Result<()> {
        info!(to = %email, name = %name, "Password reset code ready for delivery");
        Ok(())
    }

    async fn send_welcome(&self, email: &str, name: &str) -> Result<()> {
        info!(to = %email, name = %name, "Welcome message ready for delivery");
        Ok(())
    }
}
