pub mod auth;
pub mod error;
pub mod identity;
pub mod inbox;
pub mod mailer;
pub mod milestones;
pub mod models;
pub mod notify;
pub mod openapi;
pub mod rate_limit; // in-memory rate limiting
pub mod repo;
pub mod routes;
pub mod security;

// Re-export commonly used items for tests / external users
pub use routes::{config, AppState};
pub use security::SecurityHeaders;
