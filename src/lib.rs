// Core modules
pub mod api;
pub mod batch;
pub mod config;
pub mod fetcher;
pub mod indicators;
pub mod models;
pub mod pipeline;
pub mod strategy;

// Re-export commonly used types
pub use batch::{BatchEvent, BatchReport, BatchRunner};
pub use config::Settings;
pub use models::*;
pub use pipeline::{Pipeline, RunError};
pub use strategy::LongSetupRules;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
