//! Identity service models

pub mod challenge;
pub mod role;
pub mod user;

// Re-export for convenience
pub use challenge::ResetChallenge;
pub use role::Role;
pub use user::{FailedLogin, NewUser, User, UserSummary, UserWithSecret, normalize_email};
