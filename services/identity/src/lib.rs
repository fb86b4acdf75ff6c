pub mod clock;
pub mod credentials;
pub mod erp;
pub mod error;
pub mod jwt;
pub mod middleware;
pub mod models;
pub mod notifier;
pub mod password;
pub mod repositories;
pub mod reset;
pub mod routes;
pub mod session;
pub mod validation;

use crate::session::SessionService;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub session: SessionService,
}

impl AppState {
    pub fn new(session: SessionService) -> Self {
        Self { session }
    }
}
