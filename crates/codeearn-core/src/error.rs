//! Core error types for codeearn-core.
//!
//! This module defines the error hierarchy using thiserror. The lock engine
//! itself never surfaces these to the user: it logs and degrades. They are
//! returned by the stores, the reward path and configuration loading.

use std::path::PathBuf;
use thiserror::Error;

/// Core error type for codeearn-core.
#[derive(Error, Debug)]
pub enum CoreError {
    /// Database-related errors
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Overlay presentation errors
    #[error("Overlay error: {0}")]
    Overlay(#[from] OverlayError),

    /// Reward verification errors
    #[error("Earn error: {0}")]
    Earn(#[from] EarnError),

    /// Validation errors
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Database-specific errors.
#[derive(Error, Debug)]
pub enum DatabaseError {
    /// Failed to open database connection
    #[error("Failed to open database at {path}: {source}")]
    OpenFailed {
        path: PathBuf,
        #[source]
        source: rusqlite::Error,
    },

    /// Query execution failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Database is locked
    #[error("Database is locked")]
    Locked,

    /// Another holder of the shared connection panicked mid-write
    #[error("Database handle poisoned")]
    Poisoned,
}

/// Configuration-specific errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Failed to load configuration
    #[error("Failed to load configuration from {path}: {message}")]
    LoadFailed { path: PathBuf, message: String },

    /// Failed to save configuration
    #[error("Failed to save configuration to {path}: {message}")]
    SaveFailed { path: PathBuf, message: String },

    /// Unknown dot-path key
    #[error("Unknown config key: {0}")]
    UnknownKey(String),

    /// Invalid configuration value
    #[error("Invalid configuration value for '{key}': {message}")]
    InvalidValue { key: String, message: String },

    /// Could not resolve the data directory
    #[error("Cannot determine data directory: {0}")]
    DataDir(String),
}

/// Overlay presentation errors. Caught and logged by the presenter.
#[derive(Error, Debug)]
pub enum OverlayError {
    /// The host refused to attach the overlay (e.g. permission revoked)
    #[error("Overlay permission denied: {0}")]
    PermissionDenied(String),

    /// Attaching the overlay surface failed
    #[error("Failed to attach overlay: {0}")]
    AttachFailed(String),

    /// Detaching the overlay surface failed
    #[error("Failed to detach overlay: {0}")]
    DetachFailed(String),
}

/// Reward verification errors.
#[derive(Error, Debug)]
pub enum EarnError {
    /// The judge answered with a non-OK status
    #[error("Judge API error: {0}")]
    Judge(String),
}

/// Validation errors.
#[derive(Error, Debug)]
pub enum ValidationError {
    /// Empty required field
    #[error("'{0}' must not be blank")]
    Blank(String),
}

impl From<rusqlite::Error> for DatabaseError {
    fn from(err: rusqlite::Error) -> Self {
        match &err {
            rusqlite::Error::SqliteFailure(err, _msg) => {
                if err.code == rusqlite::ErrorCode::DatabaseLocked {
                    DatabaseError::Locked
                } else {
                    DatabaseError::QueryFailed(err.to_string())
                }
            }
            _ => DatabaseError::QueryFailed(err.to_string()),
        }
    }
}

impl From<rusqlite::Error> for CoreError {
    fn from(err: rusqlite::Error) -> Self {
        CoreError::Database(err.into())
    }
}

/// Result type alias for CoreError
pub type Result<T, E = CoreError> = std::result::Result<T, E>;
