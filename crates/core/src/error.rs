//! Core Error Types
//!
//! Defines the foundational error types used across the Insight Sync workspace.
//! These error types are dependency-free (only thiserror + std) to keep the core
//! crate lightweight.
//!
//! The root crate extends these with storage and backend variants
//! (e.g., Database, Sqlite, Backend) that require heavier dependencies.

use thiserror::Error;

/// Core error type for the Insight Sync workspace.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Invalid scope or period key
    #[error("Invalid scope: {0}")]
    InvalidScope(String),

    /// Unknown insight kind name
    #[error("Unknown insight kind: {0}")]
    UnknownKind(String),

    /// JSON serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(String),

    /// Parse errors
    #[error("Parse error: {0}")]
    Parse(String),
}

/// Result type alias for core errors
pub type CoreResult<T> = Result<T, CoreError>;

impl CoreError {
    /// Create an invalid scope error
    pub fn invalid_scope(msg: impl Into<String>) -> Self {
        Self::InvalidScope(msg.into())
    }

    /// Create a validation error
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }

    /// Create a parse error
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }
}

impl From<CoreError> for String {
    fn from(err: CoreError) -> String {
        err.to_string()
    }
}
