//! Core Service Layer
//!
//! Shared infrastructure for the Spotter server: identity verification,
//! data models, configuration, errors and storage.

pub mod auth;
pub mod config;
pub mod ctx;
pub mod error;
pub mod models;
pub mod router;
pub mod store;

// Re-exports for convenience
pub use config::{AppState, ServerConfig};
pub use ctx::Ctx;
pub use error::{Error, Result};
pub use router::router;
