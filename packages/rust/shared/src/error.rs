//! Error types for sitesort.
//!
//! Library crates use [`SitesortError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;

/// Top-level error type for all sitesort operations.
#[derive(Debug, thiserror::Error)]
pub enum SitesortError {
    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Rejected input (malformed domain, invalid processing config).
    #[error("validation error: {message}")]
    Validation { message: String },

    /// Page could not be retrieved (network, timeout, block).
    #[error("fetch error: {0}")]
    Fetch(String),

    /// Text could not be extracted from a fetched payload.
    #[error("extract error: {0}")]
    Extract(String),

    /// Classifier call failed or returned unusable output.
    #[error("classify error: {0}")]
    Classify(String),

    /// Database or storage layer error.
    #[error("storage error: {0}")]
    Storage(String),

    /// Batch-aborting condition.
    #[error("fatal error: {0}")]
    Fatal(String),

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, SitesortError>;

impl SitesortError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a validation error from any displayable message.
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation {
            message: msg.into(),
        }
    }

    /// Wrap a `std::io::Error` with a path for context.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    /// Short cause text without the category prefix, used as the summary
    /// of synthesized error results.
    pub fn cause(&self) -> String {
        match self {
            Self::Config { message } | Self::Validation { message } => message.clone(),
            Self::Fetch(msg)
            | Self::Extract(msg)
            | Self::Classify(msg)
            | Self::Storage(msg)
            | Self::Fatal(msg) => msg.clone(),
            Self::Io { .. } => self.to_string(),
        }
    }
}
