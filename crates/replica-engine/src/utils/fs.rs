//! Filesystem helpers shared across modules.
//!
//! These helpers provide consistent error context (operation + path) and
//! treat "already exists" races on directory creation as success.

use std::io::ErrorKind;
use std::path::Path;

use crate::{Error, Result};

/// Convert an IO error into an engine error with operation + path context.
pub fn io_error(op: &'static str, path: &Path, source: std::io::Error) -> Error {
    Error::io_path(op, path, source)
}

/// Ensure a directory exists, creating it (recursively) if needed.
///
/// Another worker creating the same directory concurrently is not an error.
pub async fn ensure_dir_all_with_op(op: &'static str, path: &Path) -> Result<()> {
    match tokio::fs::create_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists && path.is_dir() => Ok(()),
        Err(e) => Err(io_error(op, path, e)),
    }
}

/// Ensure the parent directory of a file path exists.
pub async fn ensure_parent_dir(path: &Path) -> Result<()> {
    let Some(parent) = path.parent() else {
        return Ok(());
    };
    if parent.as_os_str().is_empty() {
        return Ok(());
    }
    ensure_dir_all_with_op("creating directory", parent).await
}

/// Size of a regular file, or `None` if it does not exist or is not a file.
pub async fn file_size(path: &Path) -> Option<u64> {
    match tokio::fs::metadata(path).await {
        Ok(meta) if meta.is_file() => Some(meta.len()),
        _ => None,
    }
}

/// Size of a file for progress sampling; a file that has not been created yet counts as empty.
pub async fn written_bytes(path: &Path) -> u64 {
    file_size(path).await.unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_ensure_parent_dir_creates_nested_directories() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("a").join("b").join("c.nc");

        ensure_parent_dir(&file).await.unwrap();
        assert!(temp.path().join("a").join("b").is_dir());
    }

    #[tokio::test]
    async fn test_ensure_parent_dir_existing_is_ok() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("c.nc");

        ensure_parent_dir(&file).await.unwrap();
        ensure_parent_dir(&file).await.unwrap();
    }

    #[tokio::test]
    async fn test_ensure_parent_dir_blocked_by_file() {
        let temp = TempDir::new().unwrap();
        std::fs::write(temp.path().join("blocker"), b"x").unwrap();
        let file = temp.path().join("blocker").join("c.nc");

        let err = ensure_parent_dir(&file).await.unwrap_err();
        assert!(matches!(err, Error::IoPath { .. }));
    }

    #[tokio::test]
    async fn test_file_size() {
        let temp = TempDir::new().unwrap();
        let file = temp.path().join("data.nc");
        assert_eq!(file_size(&file).await, None);
        assert_eq!(written_bytes(&file).await, 0);

        std::fs::write(&file, vec![0u8; 42]).unwrap();
        assert_eq!(file_size(&file).await, Some(42));
        assert_eq!(written_bytes(&file).await, 42);
        assert_eq!(file_size(temp.path()).await, None);
    }
}
