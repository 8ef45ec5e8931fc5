//! Error types for the Vireo resolution pipeline.
//!
//! Adapter-level search failures are not carried here; they travel as
//! [`crate::search::SearchOutcome`] values and are attached to ranked
//! candidates instead of raised.

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the resolver core.
#[derive(Debug, Error)]
pub enum VireoError {
    // Input errors are surfaced, never retried.
    #[error("Invalid workflow: {message}")]
    InvalidWorkflow { message: String },

    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        cause: Option<String>,
    },

    #[error("Request timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Authentication required for {service}")]
    AuthRequired { service: String },

    #[error("Permanent failure: {message}")]
    Permanent { message: String },

    // Download manager errors
    #[error("Download failed for {url}: {message}")]
    DownloadFailed { url: String, message: String },

    #[error("Another active download owns {0}")]
    TargetBusy(PathBuf),

    #[error("Size mismatch: expected {expected} bytes, got {actual}")]
    IntegrityFailure { expected: u64, actual: u64 },

    #[error("Operation cancelled")]
    Cancelled,

    // Lookup errors
    #[error("Not found: {0}")]
    NotFound(String),

    // Storage errors
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[source]
        source: Option<rusqlite::Error>,
    },

    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },
}

/// Result type alias for resolver operations.
pub type Result<T> = std::result::Result<T, VireoError>;

impl From<std::io::Error> for VireoError {
    fn from(err: std::io::Error) -> Self {
        VireoError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for VireoError {
    fn from(err: serde_json::Error) -> Self {
        VireoError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<rusqlite::Error> for VireoError {
    fn from(err: rusqlite::Error) -> Self {
        VireoError::Database {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for VireoError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            VireoError::Timeout(std::time::Duration::from_secs(0))
        } else {
            VireoError::Network {
                cause: Some(err.to_string()),
                message: err.to_string(),
            }
        }
    }
}

impl VireoError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        VireoError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Check if this error should trigger a retry.
    pub fn is_retryable(&self) -> bool {
        matches!(self, VireoError::Network { .. } | VireoError::Timeout(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = VireoError::TargetBusy(PathBuf::from("/models/loras/x.safetensors"));
        assert_eq!(
            err.to_string(),
            "Another active download owns /models/loras/x.safetensors"
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(VireoError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(VireoError::Network {
            message: "reset".into(),
            cause: None
        }
        .is_retryable());
        assert!(!VireoError::Cancelled.is_retryable());
        assert!(!VireoError::Permanent {
            message: "404".into()
        }
        .is_retryable());
    }
}
