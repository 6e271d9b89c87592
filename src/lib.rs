// Core modules
pub mod config;
pub mod db;
pub mod error;
pub mod exchange;
pub mod execution;
pub mod feed;
pub mod indicators;
pub mod memory;
pub mod models;
pub mod risk;
pub mod voting;

// Re-export commonly used types
pub use config::Settings;
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
