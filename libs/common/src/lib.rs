//! Common library for the Harbor back office
//!
//! This crate provides shared functionality used across the services of the
//! back office, including database connectivity and error handling.

pub mod database;
pub mod error;

pub use error::{DatabaseError, DatabaseResult};
