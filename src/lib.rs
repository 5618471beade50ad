// Core modules
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod dedup;
pub mod exchange;
pub mod models;
pub mod pipeline;
pub mod risk;
pub mod webhook;

// Re-export commonly used types
pub use config::AppConfig;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
