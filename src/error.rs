// Centralized error handling module
// One error type shared by the content store, the transport and the engine

use std::io;
use std::path::PathBuf;

/// Result type for vaultsync operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while storing or synchronizing files
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The path is empty, absolute, reserved, or resolves outside the store root.
    /// Never retried.
    #[error("invalid path: {path}")]
    InvalidPath { path: String },

    /// The path does not exist. Expected during reconciliation when another
    /// client already deleted it.
    #[error("not found: {path}")]
    NotFound { path: String },

    /// Local disk failure
    #[error("I/O error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Network failure, timeout, or non-success status from a remote store
    #[error("transport error: {message}")]
    Transport { message: String },

    /// Malformed listing or tombstone payload
    #[error("failed to decode {what}: {message}")]
    Decode { what: String, message: String },
}

impl Error {
    pub fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }

    pub fn invalid_path(path: impl Into<String>) -> Self {
        Self::InvalidPath { path: path.into() }
    }

    pub fn not_found(path: impl Into<String>) -> Self {
        Self::NotFound { path: path.into() }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    /// Map an io::Error, turning `NotFound` into the dedicated variant
    pub fn from_io(path: impl Into<PathBuf>, rel_path: &str, source: io::Error) -> Self {
        if source.kind() == io::ErrorKind::NotFound {
            Self::not_found(rel_path)
        } else {
            Self::io(path, source)
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound { .. })
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::transport(format!("request timed out: {}", err))
        } else if err.is_decode() {
            Self::Decode {
                what: "response body".to_string(),
                message: err.to_string(),
            }
        } else {
            Self::transport(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_io_maps_not_found() {
        let err = Error::from_io(
            "/data/a.md",
            "a.md",
            io::Error::new(io::ErrorKind::NotFound, "gone"),
        );
        assert!(err.is_not_found());

        let err = Error::from_io(
            "/data/a.md",
            "a.md",
            io::Error::new(io::ErrorKind::PermissionDenied, "nope"),
        );
        assert!(matches!(err, Error::Io { .. }));
    }

    #[test]
    fn test_display_includes_path() {
        let err = Error::invalid_path("../etc/passwd");
        assert_eq!(err.to_string(), "invalid path: ../etc/passwd");
    }
}
