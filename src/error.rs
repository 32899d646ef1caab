//! Error types for ethoflux

use thiserror::Error;

/// Errors that can occur while loading or scoring a session
#[derive(Debug, Error)]
pub enum ScoringError {
    #[error("Missing input data: {0}")]
    MissingInputData(String),

    #[error("Invalid time base: {0}")]
    InvalidTimeBase(String),

    #[error("Failed to parse session input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid episode edit: {0}")]
    InvalidEdit(String),

    /// Classification or episode invariant broken. Always a defect, never user input.
    #[error("Internal invariant violated: {0}")]
    InvariantViolation(String),
}
