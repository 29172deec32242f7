//! Error types for clog-core

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the clog-core library
#[derive(Error, Debug)]
pub enum Error {
    /// Database error
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// None of the configured project roots could be read
    #[error("discovery failed: {0}")]
    Discovery(String),

    /// A single log file could not be indexed
    #[error("failed to index {}: {message}", path.display())]
    Index { path: PathBuf, message: String },

    /// Watch pattern does not compile
    #[error("invalid regex {pattern:?}: {source}")]
    InvalidPattern {
        pattern: String,
        #[source]
        source: regex::Error,
    },

    /// Watch subscription not found
    #[error("watch subscription not found: {0}")]
    SubscriptionNotFound(i64),
}

/// Result type alias for clog-core
pub type Result<T> = std::result::Result<T, Error>;
