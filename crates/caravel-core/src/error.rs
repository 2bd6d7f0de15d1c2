//! Error types for the Caravel migration engine.
//!
//! Structural errors (malformed paths, unknown resource names, invalid
//! source/destination combinations) abort an operation before any network
//! call. Per-resource errors during a migration are captured in the report
//! instead of propagating; see [`ErrorKind`] for the classification the
//! report records.

use std::error::Error as _;
use std::path::PathBuf;
use thiserror::Error;

/// Main error type for the Caravel engine.
#[derive(Debug, Error)]
pub enum CaravelError {
    // Structural errors, rejected pre-flight
    #[error("Malformed path {path:?}: segment {segment:?} {reason}")]
    MalformedPath {
        path: String,
        segment: String,
        reason: String,
    },

    #[error("Unknown resource type: {name}")]
    UnknownResource { name: String },

    // Field is `src` rather than `source` because thiserror reserves the
    // `source` field name for an underlying `std::error::Error` cause.
    #[error("Invalid source/destination combination ({src} -> {dest}): {reason}")]
    InvalidCombination {
        src: String,
        dest: String,
        reason: String,
    },

    // Network errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        /// Optional cause description
        cause: Option<String>,
    },

    #[error("Request timeout after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Rate limited by {service}, retry after {retry_after_secs:?} seconds")]
    RateLimited {
        service: String,
        retry_after_secs: Option<u64>,
    },

    // Permanent remote errors
    #[error("Not found: {what}")]
    NotFound { what: String },

    #[error("Permission denied: {what}")]
    PermissionDenied { what: String },

    #[error("Backend {backend} does not support {operation}")]
    Unsupported {
        backend: String,
        operation: String,
    },

    // File system errors
    #[error("IO error at {path:?}: {message}")]
    Io {
        message: String,
        path: Option<PathBuf>,
        #[source]
        source: Option<std::io::Error>,
    },

    #[error("Local store error: {message}")]
    Store { message: String },

    #[error("Hash mismatch for {path}: expected {expected}, got {actual}")]
    HashMismatch {
        path: String,
        expected: String,
        actual: String,
    },

    // Serialization errors
    #[error("JSON error: {message}")]
    Json {
        message: String,
        #[source]
        source: Option<serde_json::Error>,
    },

    // Configuration errors
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Operation cancelled")]
    Cancelled,

    // Generic errors
    #[error("{0}")]
    Other(String),
}

/// Result type alias for Caravel operations.
pub type Result<T> = std::result::Result<T, CaravelError>;

/// Coarse classification recorded in migration reports.
///
/// Collapses [`CaravelError`] variants into the categories that matter for
/// outcome accounting: whether a failure was structural, permanent, or
/// transient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    MalformedPath,
    UnknownResource,
    InvalidCombination,
    PermissionDenied,
    NotFound,
    TransientNetwork,
    LocalFilesystem,
    HashMismatch,
    Unsupported,
    Cancelled,
    Other,
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::MalformedPath => "malformed-path",
            ErrorKind::UnknownResource => "unknown-resource",
            ErrorKind::InvalidCombination => "invalid-combination",
            ErrorKind::PermissionDenied => "permission-denied",
            ErrorKind::NotFound => "not-found",
            ErrorKind::TransientNetwork => "transient-network",
            ErrorKind::LocalFilesystem => "local-filesystem",
            ErrorKind::HashMismatch => "hash-mismatch",
            ErrorKind::Unsupported => "unsupported",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::Other => "other",
        };
        write!(f, "{}", s)
    }
}

// Conversion implementations for common error types

impl From<std::io::Error> for CaravelError {
    fn from(err: std::io::Error) -> Self {
        CaravelError::Io {
            message: err.to_string(),
            path: None,
            source: Some(err),
        }
    }
}

impl From<serde_json::Error> for CaravelError {
    fn from(err: serde_json::Error) -> Self {
        CaravelError::Json {
            message: err.to_string(),
            source: Some(err),
        }
    }
}

impl From<reqwest::Error> for CaravelError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            CaravelError::Timeout(std::time::Duration::from_secs(0))
        } else {
            CaravelError::Network {
                message: err.to_string(),
                cause: err.source().map(|s| s.to_string()),
            }
        }
    }
}

impl CaravelError {
    /// Create an IO error with path context.
    pub fn io_with_path(err: std::io::Error, path: impl Into<PathBuf>) -> Self {
        CaravelError::Io {
            message: err.to_string(),
            path: Some(path.into()),
            source: Some(err),
        }
    }

    /// Classify this error for report accounting.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CaravelError::MalformedPath { .. } => ErrorKind::MalformedPath,
            CaravelError::UnknownResource { .. } => ErrorKind::UnknownResource,
            CaravelError::InvalidCombination { .. } => ErrorKind::InvalidCombination,
            CaravelError::PermissionDenied { .. } => ErrorKind::PermissionDenied,
            CaravelError::NotFound { .. } => ErrorKind::NotFound,
            CaravelError::Network { .. }
            | CaravelError::Timeout(_)
            | CaravelError::RateLimited { .. } => ErrorKind::TransientNetwork,
            CaravelError::Io { .. } | CaravelError::Store { .. } => ErrorKind::LocalFilesystem,
            CaravelError::HashMismatch { .. } => ErrorKind::HashMismatch,
            CaravelError::Unsupported { .. } => ErrorKind::Unsupported,
            CaravelError::Cancelled => ErrorKind::Cancelled,
            CaravelError::Json { .. } | CaravelError::Config { .. } | CaravelError::Other(_) => {
                ErrorKind::Other
            }
        }
    }

    /// Check if this error should trigger a retry.
    ///
    /// Only transient network conditions qualify; permanent remote errors
    /// (not-found, permission-denied) and local filesystem errors never do.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            CaravelError::Network { .. }
                | CaravelError::Timeout(_)
                | CaravelError::RateLimited { .. }
        )
    }

    /// Whether this error is a structural one that must abort pre-flight.
    pub fn is_structural(&self) -> bool {
        matches!(
            self,
            CaravelError::MalformedPath { .. }
                | CaravelError::UnknownResource { .. }
                | CaravelError::InvalidCombination { .. }
                | CaravelError::Config { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CaravelError::UnknownResource {
            name: "metricz".into(),
        };
        assert_eq!(err.to_string(), "Unknown resource type: metricz");
    }

    #[test]
    fn test_kind_classification() {
        assert_eq!(
            CaravelError::NotFound {
                what: "experiment abc".into()
            }
            .kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            CaravelError::Timeout(std::time::Duration::from_secs(5)).kind(),
            ErrorKind::TransientNetwork
        );
        assert_eq!(
            CaravelError::Store {
                message: "bad manifest".into()
            }
            .kind(),
            ErrorKind::LocalFilesystem
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(CaravelError::Timeout(std::time::Duration::from_secs(5)).is_retryable());
        assert!(CaravelError::RateLimited {
            service: "api.example.com".into(),
            retry_after_secs: Some(3),
        }
        .is_retryable());
        assert!(!CaravelError::NotFound {
            what: "project p".into()
        }
        .is_retryable());
        assert!(!CaravelError::PermissionDenied {
            what: "workspace w".into()
        }
        .is_retryable());
    }

    #[test]
    fn test_structural_errors() {
        assert!(CaravelError::MalformedPath {
            path: "a//b".into(),
            segment: "".into(),
            reason: "is empty".into(),
        }
        .is_structural());
        assert!(!CaravelError::Cancelled.is_structural());
    }
}
