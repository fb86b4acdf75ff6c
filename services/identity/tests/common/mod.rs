//! Shared fixtures for the identity integration tests
#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use identity::{
    clock::{Clock, ManualClock},
    erp::{ErpError, ErpIdentity, ErpIdentityClient, ErpProfile, IdentitySynchronizer},
    jwt::{JwtConfig, JwtService},
    models::User,
    notifier::Notifier,
    password::PasswordHasher,
    repositories::{MemoryUserStore, UserStore},
    session::{SessionConfig, SessionService},
};

pub const PASSWORD: &str = "Harbor-pass1!";
pub const NEW_PASSWORD: &str = "Quay-side2?";
pub const JWT_SECRET: &str = "integration-test-secret-of-at-least-32-bytes";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Sent {
    Reset,
    Otp,
    Welcome,
}

/// Notifier that keeps every message it was asked to deliver
#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Sent, String, Option<String>)>>,
}

impl RecordingNotifier {
    fn push(&self, kind: Sent, email: &str, secret: Option<&str>) {
        self.sent
            .lock()
            .unwrap()
            .push((kind, email.to_string(), secret.map(str::to_string)));
    }

    /// Secret carried by the latest message of `kind` to `email`
    pub fn last_secret(&self, kind: Sent, email: &str) -> Option<String> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .rev()
            .find(|(k, to, _)| *k == kind && to == email)
            .and_then(|(_, _, secret)| secret.clone())
    }

    pub fn count(&self, kind: Sent) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _, _)| *k == kind)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_reset(&self, email: &str, token: &str, _name: &str) -> anyhow::Result<()> {
        self.push(Sent::Reset, email, Some(token));
        Ok(())
    }

    async fn send_otp(&self, email: &str, code: &str, _name: &str) -> anyhow::Result<()> {
        self.push(Sent::Otp, email, Some(code));
        Ok(())
    }

    async fn send_welcome(&self, email: &str, _name: &str) -> anyhow::Result<()> {
        self.push(Sent::Welcome, email, None);
        Ok(())
    }
}

/// Notifier whose deliveries always fail
pub struct FailingNotifier;

#[async_trait]
impl Notifier for FailingNotifier {
    async fn send_reset(&self, _: &str, _: &str, _: &str) -> anyhow::Result<()> {
        anyhow::bail!("mail relay refused the message")
    }

    async fn send_otp(&self, _: &str, _: &str, _: &str) -> anyhow::Result<()> {
        anyhow::bail!("mail relay refused the message")
    }

    async fn send_welcome(&self, _: &str, _: &str) -> anyhow::Result<()> {
        anyhow::bail!("mail relay refused the message")
    }
}

/// ERP client whose calls never complete
pub struct HangingErp;

#[async_trait]
impl ErpIdentityClient for HangingErp {
    async fn authenticate(&self, _: &str, _: &str) -> Result<Option<ErpIdentity>, ErpError> {
        std::future::pending().await
    }

    async fn find_user(&self, _: &str) -> Result<Option<ErpIdentity>, ErpError> {
        std::future::pending().await
    }

    async fn create_user(&self, _: &ErpProfile) -> Result<String, ErpError> {
        std::future::pending().await
    }

    async fn update_password(&self, _: &str, _: &str) -> Result<(), ErpError> {
        std::future::pending().await
    }
}

/// In-memory ERP keyed by email, recording password pushes
#[derive(Default)]
pub struct FakeErp {
    accounts: Mutex<HashMap<String, String>>,
    password_updates: Mutex<Vec<(String, String)>>,
}

impl FakeErp {
    pub fn with_account(email: &str, password: &str) -> Self {
        let erp = Self::default();
        erp.accounts
            .lock()
            .unwrap()
            .insert(email.to_string(), password.to_string());
        erp
    }

    pub fn has_account(&self, email: &str) -> bool {
        self.accounts.lock().unwrap().contains_key(email)
    }

    pub fn password_of(&self, remote_id: &str) -> Option<String> {
        self.accounts.lock().unwrap().get(remote_id).cloned()
    }

    pub fn password_updates(&self) -> Vec<(String, String)> {
        self.password_updates.lock().unwrap().clone()
    }
}

fn remote(email: &str) -> ErpIdentity {
    ErpIdentity {
        remote_id: email.to_string(),
        email: email.to_string(),
        full_name: None,
    }
}

#[async_trait]
impl ErpIdentityClient for FakeErp {
    async fn authenticate(
        &self,
        email: &str,
        password: &str,
    ) -> Result<Option<ErpIdentity>, ErpError> {
        let accounts = self.accounts.lock().unwrap();
        Ok((accounts.get(email).map(String::as_str) == Some(password)).then(|| remote(email)))
    }

    async fn find_user(&self, email: &str) -> Result<Option<ErpIdentity>, ErpError> {
        Ok(self.has_account(email).then(|| remote(email)))
    }

    async fn create_user(&self, profile: &ErpProfile) -> Result<String, ErpError> {
        self.accounts
            .lock()
            .unwrap()
            .insert(profile.email.clone(), profile.password.clone());
        Ok(profile.email.clone())
    }

    async fn update_password(&self, remote_id: &str, new_password: &str) -> Result<(), ErpError> {
        let mut accounts = self.accounts.lock().unwrap();
        let Some(password) = accounts.get_mut(remote_id) else {
            return Err(ErpError::Status(404));
        };
        *password = new_password.to_string();
        self.password_updates
            .lock()
            .unwrap()
            .push((remote_id.to_string(), new_password.to_string()));
        Ok(())
    }
}

/// Session service wired to in-memory collaborators and a manual clock
pub struct Harness {
    pub service: SessionService,
    pub store: MemoryUserStore,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<ManualClock>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_erp(IdentitySynchronizer::disabled())
    }

    pub fn with_erp(erp: IdentitySynchronizer) -> Self {
        Self::build(erp, SessionConfig::default())
    }

    pub fn with_erp_client(client: Arc<dyn ErpIdentityClient>) -> Self {
        Self::with_erp(IdentitySynchronizer::new(client, Duration::from_secs(5)))
    }

    pub fn build(erp: IdentitySynchronizer, config: SessionConfig) -> Self {
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2025, 3, 1, 8, 0, 0).unwrap(),
        ));
        let store = MemoryUserStore::new();
        let notifier = Arc::new(RecordingNotifier::default());
        let jwt = JwtService::new(
            JwtConfig::with_secret(JWT_SECRET),
            clock.clone() as Arc<dyn Clock>,
        )
        .unwrap();

        let service = SessionService::new(
            Arc::new(store.clone()),
            notifier.clone(),
            erp,
            jwt,
            PasswordHasher::insecure_fast(),
            config,
            clock.clone(),
        );

        Self {
            service,
            store,
            notifier,
            clock,
        }
    }

    /// Sign up an identity with [`PASSWORD`]
    pub async fn signup(&self, name: &str, email: &str) -> User {
        self.service
            .signup(name, email, PASSWORD)
            .await
            .unwrap()
            .user
    }

    pub async fn reload(&self, user: &User) -> User {
        self.store.find_by_id(user.id).await.unwrap().unwrap()
    }
}
