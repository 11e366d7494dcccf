//! Error types for grab
//!
//! All modules use `GrabResult<T>` as their return type.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for grab operations
pub type GrabResult<T> = Result<T, GrabError>;

/// All errors that can occur while resolving and caching artifacts
#[derive(Error, Debug)]
pub enum GrabError {
    // Resolution errors
    #[error("Artifact not found: {coordinate}: {reason}")]
    NotFound { coordinate: String, reason: String },

    #[error("Checksum mismatch for {coordinate}: expected {expected}, got {actual}")]
    Integrity {
        coordinate: String,
        expected: String,
        actual: String,
    },

    #[error("Timed out after {waited:?} waiting for the lock on {coordinate}")]
    LockTimeout { coordinate: String, waited: Duration },

    #[error("Cache conflict at {path}: expected {coordinate}, metadata names {recorded}")]
    CacheConflict {
        coordinate: String,
        recorded: String,
        path: PathBuf,
    },

    #[error("Network error fetching {coordinate}: {reason}")]
    Network { coordinate: String, reason: String },

    // Input errors
    #[error("Invalid coordinate '{input}': {reason}")]
    InvalidCoordinate { input: String, reason: String },

    #[error("Invalid digest '{input}': {reason}")]
    InvalidDigest { input: String, reason: String },

    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl GrabError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create a not-found error for a coordinate
    pub fn not_found(coordinate: impl ToString, reason: impl Into<String>) -> Self {
        Self::NotFound {
            coordinate: coordinate.to_string(),
            reason: reason.into(),
        }
    }

    /// Create a network error for a coordinate
    pub fn network(coordinate: impl ToString, reason: impl Into<String>) -> Self {
        Self::Network {
            coordinate: coordinate.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network { .. } | Self::LockTimeout { .. })
    }

    /// Whether this error means the artifact is simply unavailable
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::NotFound { .. } => {
                Some("Check the coordinate, or allow downloads with resolve.auto_download = true")
            }
            Self::Integrity { .. } => {
                Some("The repository copy may be corrupt. Use --no-checksums only if you trust it")
            }
            Self::LockTimeout { .. } => {
                Some("Another process is resolving this artifact. Retry or raise resolve.lock_timeout_secs")
            }
            Self::InvalidCoordinate { .. } => Some("Use group:module:version[:classifier][@ext]"),
            Self::CacheConflict { .. } => {
                Some("The cache was modified by hand. Remove the file and resolve again")
            }
            _ => None,
        }
    }
}
