//! Error types for DME

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for DME operations
pub type Result<T> = std::result::Result<T, ExtractError>;

/// Main error type for DME
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Malformed payload in {table} row {sql_row_id}: {reason}")]
    MalformedPayload {
        table: String,
        sql_row_id: i64,
        reason: String,
    },

    #[error("Database error: {0}")]
    Database(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("No content database for language '{language}' at {}", path.display())]
    LanguageNotFound { language: String, path: PathBuf },

    #[error("Cannot create output root {}: {source}", path.display())]
    OutputRoot {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid output path: {0}")]
    InvalidPath(String),

    #[error("Runtime error: {0}")]
    Runtime(String),

    #[error("{failed} of {total} writes failed")]
    WritesFailed { failed: usize, total: usize },
}

impl ExtractError {
    /// Create a database error
    pub fn database(msg: impl Into<String>) -> Self {
        Self::Database(msg.into())
    }

    /// Create a configuration error
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config(msg.into())
    }

    /// Create a malformed payload error for a single source row
    pub fn malformed(table: impl Into<String>, sql_row_id: i64, reason: impl ToString) -> Self {
        Self::MalformedPayload {
            table: table.into(),
            sql_row_id,
            reason: reason.to_string(),
        }
    }

    /// Whether the error is confined to one row or one write and the run
    /// can carry on past it.
    pub fn is_local(&self) -> bool {
        matches!(
            self,
            ExtractError::MalformedPayload { .. } | ExtractError::InvalidPath(_)
        )
    }
}
