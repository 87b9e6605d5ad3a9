//! Error handling for pitax
//!
//! Defines the typed error taxonomy and establishes a unified Result type
//! using anyhow for context chaining and error propagation.

use thiserror::Error;

/// Core error types for tax computation
#[derive(Error, Debug)]
pub enum TaxError {
    #[error("database error: {0}")]
    Database(String),

    #[error("invalid request: {0}")]
    InvalidRequest(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("exchange rate error: {0}")]
    ExchangeRate(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("io error")]
    Io(#[from] std::io::Error),
}

/// Result type alias for tax operations
pub type Result<T> = anyhow::Result<T>;

/// Reject blank user ids before any side effect happens.
pub fn require_user_id(user_id: &str) -> Result<()> {
    if user_id.trim().is_empty() {
        return Err(TaxError::InvalidRequest("user id must not be empty".to_string()).into());
    }
    Ok(())
}
