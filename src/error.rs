//! Error types for podcast-dl
//!
//! The taxonomy separates what stops a run from what only fails one episode:
//! - [`Error::Input`] and [`Error::Parse`] are fatal and raised before any work
//!   is scheduled
//! - [`FetchError`] is per-episode and becomes a `Failed` outcome
//! - [`StorageError`] is per-episode unless it concerns the download root or
//!   the history log, in which case it aborts the run

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for podcast-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for podcast-dl
#[derive(Debug, Error)]
pub enum Error {
    /// The export file could not be read
    #[error("cannot read export {}: {source}", .path.display())]
    Input {
        /// Path that was requested
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The export is not well-formed
    #[error("invalid export: {0}")]
    Parse(#[from] ParseError),

    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_downloads")
        key: Option<String>,
    },

    /// Filesystem error while storing downloads, sidecars or history
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    /// Transfer error for a single media file or feed
    #[error("fetch error: {0}")]
    Fetch(#[from] FetchError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Shorthand for a configuration error tied to a key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Malformed export document
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("{message}{}", .position.map(|p| format!(" (at byte {p})")).unwrap_or_default())]
pub struct ParseError {
    /// What went wrong
    pub message: String,
    /// Byte offset into the document where the reader stopped, if known
    pub position: Option<u64>,
}

impl ParseError {
    /// Create a parse error at a known byte offset
    pub fn at(message: impl Into<String>, position: u64) -> Self {
        Self {
            message: message.into(),
            position: Some(position),
        }
    }
}

/// Per-episode transfer failures
#[derive(Debug, Error)]
pub enum FetchError {
    /// Server answered with a non-success status
    #[error("HTTP {status} for {url}")]
    Http {
        /// Status code returned
        status: u16,
        /// Requested URL
        url: String,
    },

    /// Connection or body read failure
    #[error("request to {url} failed: {reason}")]
    Network {
        /// Requested URL
        url: String,
        /// Underlying failure
        reason: String,
    },

    /// Body ended before the advertised Content-Length
    #[error("transfer incomplete: received {received} of {expected} bytes")]
    Truncated {
        /// Bytes promised by Content-Length
        expected: u64,
        /// Bytes actually received
        received: u64,
    },

    /// Writing the body to the temporary file failed
    #[error("failed to write body: {reason}")]
    Write {
        /// Underlying failure
        reason: String,
    },
}

/// Filesystem failures while committing results
#[derive(Debug, Error)]
pub enum StorageError {
    /// Directory could not be created
    #[error("failed to create directory {}: {reason}", .path.display())]
    CreateDir {
        /// Directory that could not be created
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// Temporary file could not be moved into place
    #[error("failed to move {} to {}: {reason}", .from.display(), .to.display())]
    Rename {
        /// Temporary path
        from: PathBuf,
        /// Final path
        to: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// History log could not be read or appended
    #[error("download history {}: {reason}", .path.display())]
    Log {
        /// Log file path
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },

    /// Every candidate file name belongs to another episode
    #[error("no collision-free file name available for {}", .path.display())]
    NoFreeName {
        /// Preferred media path
        path: PathBuf,
    },

    /// Metadata sidecar could not be written
    #[error("failed to write metadata {}: {reason}", .path.display())]
    Sidecar {
        /// Sidecar path
        path: PathBuf,
        /// Underlying failure
        reason: String,
    },
}
