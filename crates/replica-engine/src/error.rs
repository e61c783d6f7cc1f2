//! Engine-wide error types.
//!
//! Per-task failures never travel through [`Error`]; workers turn them into
//! [`Outcome`](crate::Outcome) values. This type covers configuration,
//! transport lookup and process spawning.

use std::path::{Path, PathBuf};

use thiserror::Error;

/// Engine-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Engine-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error while {op} {}: {source}", .path.display())]
    IoPath {
        op: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("No transport registered for scheme \"{0}\"")]
    UnsupportedScheme(String),

    #[error("Failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    pub fn io_path(op: &'static str, path: &Path, source: std::io::Error) -> Self {
        Self::IoPath {
            op,
            path: path.to_path_buf(),
            source,
        }
    }

    pub fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }

    pub fn transport(msg: impl Into<String>) -> Self {
        Self::Transport(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_path_message_names_operation_and_path() {
        let err = Error::io_path(
            "creating directory",
            Path::new("/data/cmip5"),
            std::io::Error::from(std::io::ErrorKind::PermissionDenied),
        );
        let msg = err.to_string();
        assert!(msg.contains("creating directory"));
        assert!(msg.contains("/data/cmip5"));
    }

    #[test]
    fn test_unsupported_scheme_message() {
        let err = Error::UnsupportedScheme("gopher".to_string());
        assert_eq!(err.to_string(), "No transport registered for scheme \"gopher\"");
    }
}
