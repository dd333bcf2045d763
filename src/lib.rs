pub mod auth;
pub mod comments;
pub mod config;
pub mod engagement;
pub mod error;
pub mod feed;
pub mod identity;
pub mod media;
pub mod models;
pub mod openapi;
pub mod repo;
pub mod routes;
pub mod security;

// Re-export commonly used items for tests / external users
pub use routes::{config as configure, AppState};
pub use security::SecurityHeaders;
