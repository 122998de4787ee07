//! Error handling module for the installer
//!
//! Centralised error type built on thiserror. Library code returns these;
//! the binary wraps them in `anyhow` where it only needs to report.

use thiserror::Error;

/// Main error type for the installer library
#[derive(Error, Debug)]
pub enum InstallerError {
    /// IO errors (file operations, directories, pipes)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Settings errors (loading, parsing)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Validation errors (user-supplied installation values)
    #[error("Validation error: {0}")]
    Validation(String),

    /// External command errors outside a stage result
    #[error("Command error: {0}")]
    Command(String),

    /// Configuration generator failures
    #[error("Generation error: {0}")]
    Generation(String),

    /// Phase state machine transition errors
    #[error("Install transition error: {0}")]
    InstallTransition(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// General errors (catch-all for edge cases)
    #[error("{0}")]
    General(String),
}

/// Result type alias for installer operations
pub type Result<T> = std::result::Result<T, InstallerError>;

impl InstallerError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    pub fn command(msg: impl Into<String>) -> Self {
        Self::Command(msg.into())
    }

    pub fn generation(msg: impl Into<String>) -> Self {
        Self::Generation(msg.into())
    }

    pub fn general(msg: impl Into<String>) -> Self {
        Self::General(msg.into())
    }
}
