// src/error.rs

//! Error types for refstash
//!
//! Only faults that must escalate to the caller live here. Conversion tool
//! failures are ordinary values (see [`crate::tools::StageOutcome`]) and
//! never become an `Error`.

use thiserror::Error;

/// Library-wide error type
#[derive(Error, Debug)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("I/O error: {0}")]
    IoError(String),

    #[error("Download failed: {0}")]
    DownloadError(String),

    #[error("Repository error: {0}")]
    RepositoryError(String),

    #[error("Object store error: {0}")]
    StoreError(String),

    #[error("Configuration error: {0}")]
    ConfigError(String),

    #[error("Initialization failed: {0}")]
    InitError(String),

    #[error("Parse error: {0}")]
    ParseError(String),

    #[error("Not found: {0}")]
    NotFoundError(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result alias used throughout the library
pub type Result<T> = std::result::Result<T, Error>;
