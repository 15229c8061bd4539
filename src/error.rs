//! Error types for media-dl
//!
//! A single crate-wide [`Error`] enum covers every failure the download engine can
//! observe. Errors never cross the public task API: the task translates them into
//! status transitions and [`TaskEvent`](crate::types::TaskEvent)s, and logs the detail.

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for media-dl operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for media-dl
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "download_dir")
        key: Option<String>,
    },

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Image decode/encode error (page interceptors)
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),

    /// HLS playlist could not be fetched, parsed, or resolved
    #[error("playlist error: {0}")]
    Playlist(String),

    /// Source module failed (page list, stream resolution, interceptor)
    #[error("source error: {0}")]
    Source(String),

    /// A working directory disappeared while the download was using it
    #[error("directory missing: {}", path.display())]
    DirectoryMissing {
        /// The directory that was expected to exist
        path: PathBuf,
    },

    /// Item not found
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation was cancelled cooperatively
    #[error("operation cancelled")]
    Cancelled,

    /// External tool execution failed (ffmpeg)
    #[error("external tool error: {0}")]
    ExternalTool(String),

    /// Operation not supported (missing binary, not implemented, etc.)
    #[error("not supported: {0}")]
    NotSupported(String),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a [`Error::DirectoryMissing`] error
    pub fn directory_missing(path: impl Into<PathBuf>) -> Self {
        Error::DirectoryMissing { path: path.into() }
    }
}

// unwrap/expect are acceptable in tests for concise failure-on-error assertions
#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn directory_missing_display_includes_path() {
        let err = Error::directory_missing("/downloads/src/series/.tmp_ch1");
        assert_eq!(
            err.to_string(),
            "directory missing: /downloads/src/series/.tmp_ch1"
        );
    }

    #[test]
    fn config_error_display_uses_message() {
        let err = Error::Config {
            message: "batch_size must be positive".to_string(),
            key: Some("batch_size".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "configuration error: batch_size must be positive"
        );
    }

    #[test]
    fn io_error_converts_via_from() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn serde_error_converts_via_from() {
        let parse = serde_json::from_str::<serde_json::Value>("{not json").unwrap_err();
        let err: Error = parse.into();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn cancelled_has_stable_message() {
        assert_eq!(Error::Cancelled.to_string(), "operation cancelled");
    }
}
