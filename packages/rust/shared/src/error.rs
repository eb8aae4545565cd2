//! Error types for PageStream.
//!
//! Library crates use [`PageStreamError`] via `thiserror`.
//! The CLI wraps this with `color-eyre` for rich diagnostics.

use std::path::PathBuf;
use std::time::Duration;

/// Top-level error type for all PageStream operations.
#[derive(Debug, thiserror::Error)]
pub enum PageStreamError {
    /// A local source identifier does not exist.
    #[error("source not found: {path:?}")]
    NotFound { path: PathBuf },

    /// Transport-level failure while fetching or reading a source stream.
    #[error("fetch error: {0}")]
    Fetch(String),

    /// The remote source did not answer before the deadline.
    #[error("fetch of {source_id} timed out after {after:?}")]
    TimedOut { source_id: String, after: Duration },

    /// The fetch was cancelled through its cancellation token.
    #[error("fetch of {source_id} was cancelled")]
    Cancelled { source_id: String },

    /// A single record in the stream could not be decoded.
    #[error("decode error in record {record}: {message}")]
    Decode { record: usize, message: String },

    /// Materializing a file to disk failed.
    #[error("write error at {path:?}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Configuration loading or validation error.
    #[error("config error: {message}")]
    Config { message: String },

    /// Filesystem I/O error.
    #[error("I/O error at {path:?}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    /// Invalid input (unsafe output path, malformed identifier, etc.).
    #[error("validation error: {message}")]
    Validation { message: String },
}

/// Convenience alias used throughout the codebase.
pub type Result<T> = std::result::Result<T, PageStreamError>;

impl PageStreamError {
    /// Create a config error from any displayable message.
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    /// Create a fetch error from any displayable message.
    pub fn fetch(msg: impl Into<String>) -> Self {
        Self::Fetch(msg.into())
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

    /// Wrap a `std::io::Error` raised while writing a materialized file.
    pub fn write(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Write {
            path: path.into(),
            source,
        }
    }

    /// True for errors that prevent a source stream from being established.
    ///
    /// These degrade a merge to "zero pages from this source" unless the
    /// caller runs in strict mode.
    pub fn is_fetch_failure(&self) -> bool {
        matches!(
            self,
            Self::NotFound { .. }
                | Self::Fetch(_)
                | Self::TimedOut { .. }
                | Self::Cancelled { .. }
                | Self::Io { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_formatting() {
        let err = PageStreamError::config("missing source");
        assert_eq!(err.to_string(), "config error: missing source");

        let err = PageStreamError::Decode {
            record: 4,
            message: "expected `:` at line 1 column 9".into(),
        };
        assert!(err.to_string().contains("record 4"));
    }

    #[test]
    fn timeouts_and_cancellation_are_distinct() {
        let timed_out = PageStreamError::TimedOut {
            source_id: "http://example.com/pages.json".into(),
            after: Duration::from_secs(5),
        };
        let cancelled = PageStreamError::Cancelled {
            source_id: "http://example.com/pages.json".into(),
        };
        assert!(timed_out.to_string().contains("timed out"));
        assert!(cancelled.to_string().contains("cancelled"));
        assert!(!matches!(timed_out, PageStreamError::Fetch(_)));
    }

    #[test]
    fn fetch_failure_classification() {
        assert!(PageStreamError::fetch("connection refused").is_fetch_failure());
        assert!(
            PageStreamError::NotFound {
                path: "pages.json".into()
            }
            .is_fetch_failure()
        );
        assert!(
            !PageStreamError::Decode {
                record: 0,
                message: String::new()
            }
            .is_fetch_failure()
        );
        assert!(!PageStreamError::validation("bad path").is_fetch_failure());
    }
}
