// Core modules
pub mod api;
pub mod backtest;
pub mod config;
pub mod db;
pub mod error;
pub mod execution;
pub mod indicators;
pub mod journal;
pub mod models;
pub mod strategy;

// Re-export commonly used types
pub use config::BotConfig;
pub use error::{CycleError, ExchangeError, JournalError};
pub use models::*;

// Error handling
pub type Result<T> = std::result::Result<T, Box<dyn std::error::Error + Send + Sync>>;
