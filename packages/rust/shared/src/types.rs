//! Core domain types shared by the PageStream crates.

use std::path::Path;

/// Marker that distinguishes a remote source from a local path.
pub const SCHEME_SEPARATOR: &str = "://";

// ---------------------------------------------------------------------------
// SourceId
// ---------------------------------------------------------------------------

/// A configured page-stream source, classified once at construction.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum SourceId {
    /// No source configured. Loading from it is a no-op, not an error.
    Empty,
    /// A URL fetched over HTTP.
    Remote(String),
    /// A filesystem path, resolved against the configured root.
    Local(String),
}

impl SourceId {
    /// Classify a raw identifier string.
    pub fn parse(raw: &str) -> Self {
        let raw = raw.trim();
        if raw.is_empty() {
            Self::Empty
        } else if raw.contains(SCHEME_SEPARATOR) {
            Self::Remote(raw.to_string())
        } else {
            Self::Local(raw.to_string())
        }
    }

    pub fn is_empty(&self) -> bool {
        matches!(self, Self::Empty)
    }

    pub fn as_str(&self) -> &str {
        match self {
            Self::Empty => "",
            Self::Remote(s) | Self::Local(s) => s,
        }
    }

    /// The local path, if this is a local source.
    pub fn local_path(&self) -> Option<&Path> {
        match self {
            Self::Local(s) => Some(Path::new(s)),
            _ => None,
        }
    }
}

impl From<&str> for SourceId {
    fn from(raw: &str) -> Self {
        Self::parse(raw)
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Empty => write!(f, "<none>"),
            Self::Remote(s) | Self::Local(s) => write!(f, "{s}"),
        }
    }
}
