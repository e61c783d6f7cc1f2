//! Local checks run before a transfer is started.
//!
//! The pre-check decides which byte range to request, or that no transfer is
//! needed at all. It owns the quarantine of files that failed verification:
//! a bad file is moved into `bad0/` (or `bad1/` if that already holds one) next
//! to the target; an empty bad file is simply removed.

use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::outcome::{FailureReason, Outcome};
use crate::task::{ControlFlag, Task};
use crate::transport::TransferRequest;
use crate::utils::fs::{ensure_dir_all_with_op, ensure_parent_dir, file_size, io_error};
use crate::Result;

/// Number of quarantine directories tried before giving up on a file.
pub const QUARANTINE_SLOTS: usize = 2;

/// What the pre-check decided for a task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precheck {
    /// Run the transport for this range.
    Transfer(TransferRequest),
    /// Report this outcome without running a transport.
    Finished(Outcome),
}

/// Result of moving a known-bad file aside.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Quarantine {
    /// No file was present.
    Missing,
    /// The file was empty and got removed.
    Deleted,
    /// The file now lives at this path.
    Moved(PathBuf),
    /// Every quarantine slot already holds a file of this name.
    Exhausted,
}

/// Directory of quarantine slot `n` for a target path.
pub fn quarantine_dir(target: &Path, n: usize) -> PathBuf {
    let parent = target.parent().unwrap_or_else(|| Path::new(""));
    parent.join(format!("bad{n}"))
}

/// Move a known-bad file out of the way of a new download.
pub async fn quarantine(target: &Path) -> Result<Quarantine> {
    let Some(size) = file_size(target).await else {
        return Ok(Quarantine::Missing);
    };
    if size == 0 {
        tokio::fs::remove_file(target)
            .await
            .map_err(|e| io_error("removing empty file", target, e))?;
        return Ok(Quarantine::Deleted);
    }

    let Some(name) = target.file_name() else {
        return Ok(Quarantine::Exhausted);
    };
    for n in 0..QUARANTINE_SLOTS {
        let dir = quarantine_dir(target, n);
        let destination = dir.join(name);
        if file_size(&destination).await.is_some() {
            continue;
        }
        ensure_dir_all_with_op("creating quarantine directory", &dir).await?;
        tokio::fs::rename(target, &destination)
            .await
            .map_err(|e| io_error("quarantining", target, e))?;
        return Ok(Quarantine::Moved(destination));
    }
    Ok(Quarantine::Exhausted)
}

/// Decide what to do with a task before any transport runs.
pub async fn precheck(task: &Task) -> Precheck {
    let target = task.target_path();
    let io_failure = |e: crate::Error| {
        warn!(target = %target.display(), "Pre-check failed: {}", e);
        Precheck::Finished(Outcome::IoError {
            task: task.clone(),
            reason: e.to_string(),
        })
    };

    if let Err(e) = ensure_parent_dir(target).await {
        return io_failure(e);
    }

    let expected = task.expected_size();
    let request = |start: u64| {
        Precheck::Transfer(TransferRequest::new(
            task.source_url(),
            target,
            start,
            expected,
        ))
    };

    if task.control_flag() == ControlFlag::QuarantinePrevious {
        return match quarantine(target).await {
            Ok(Quarantine::Exhausted) => {
                warn!(
                    target = %target.display(),
                    "File is bad and has been downloaded too many times, giving up"
                );
                Precheck::Finished(Outcome::already_present(task.clone()))
            }
            Ok(Quarantine::Moved(to)) => {
                debug!(target = %target.display(), to = %to.display(), "Quarantined bad file");
                request(0)
            }
            Ok(_) => request(0),
            Err(e) => io_failure(e),
        };
    }

    let Some(existing) = file_size(target).await else {
        return request(0);
    };

    match expected {
        Some(expected) if existing == expected => {
            debug!(target = %target.display(), "File already present");
            Precheck::Finished(Outcome::already_present(task.clone()))
        }
        Some(expected) if existing > expected => {
            warn!(
                url = task.source_url(),
                target = %target.display(),
                existing,
                expected,
                "Existing file is too big, not downloading"
            );
            Precheck::Finished(Outcome::TransferError {
                task: task.clone(),
                reason: FailureReason::SizeMismatch { existing, expected },
            })
        }
        Some(_) => request(existing),
        None => {
            warn!(
                url = task.source_url(),
                target = %target.display(),
                existing,
                "File exists and its size is unknown, not downloading"
            );
            Precheck::Finished(Outcome::TransferError {
                task: task.clone(),
                reason: FailureReason::UnknownSize { existing },
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn task(dir: &TempDir, expected: Option<u64>, flag: ControlFlag) -> Task {
        Task::new(
            dir.path().join("out").join("a.nc"),
            "http://example.org/a.nc",
            expected,
            flag,
        )
    }

    async fn write(path: &Path, len: usize) {
        tokio::fs::create_dir_all(path.parent().unwrap()).await.unwrap();
        tokio::fs::write(path, vec![b'x'; len]).await.unwrap();
    }

    #[tokio::test]
    async fn test_fresh_download_creates_parent() {
        let dir = TempDir::new().unwrap();
        let task = task(&dir, Some(1000), ControlFlag::Normal);

        match precheck(&task).await {
            Precheck::Transfer(req) => {
                assert_eq!((req.start, req.end), (0, Some(1000)));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(dir.path().join("out").is_dir());
    }

    #[tokio::test]
    async fn test_resume_skip_and_mismatch() {
        let dir = TempDir::new().unwrap();
        let task = task(&dir, Some(1000), ControlFlag::Normal);

        write(task.target_path(), 400).await;
        assert_eq!(
            precheck(&task).await,
            Precheck::Transfer(TransferRequest::new(
                task.source_url(),
                task.target_path(),
                400,
                Some(1000)
            ))
        );

        write(task.target_path(), 1000).await;
        assert_eq!(
            precheck(&task).await,
            Precheck::Finished(Outcome::already_present(task.clone()))
        );

        write(task.target_path(), 1200).await;
        match precheck(&task).await {
            Precheck::Finished(Outcome::TransferError { reason, .. }) => assert_eq!(
                reason,
                FailureReason::SizeMismatch {
                    existing: 1200,
                    expected: 1000
                }
            ),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_unknown_size_with_existing_file_fails() {
        let dir = TempDir::new().unwrap();
        let task = task(&dir, None, ControlFlag::Normal);

        match precheck(&task).await {
            Precheck::Transfer(req) => assert_eq!((req.start, req.end), (0, None)),
            other => panic!("unexpected {other:?}"),
        }

        write(task.target_path(), 250).await;
        assert_eq!(
            precheck(&task).await,
            Precheck::Finished(Outcome::TransferError {
                task: task.clone(),
                reason: FailureReason::UnknownSize { existing: 250 },
            })
        );

        write(task.target_path(), 0).await;
        assert!(matches!(
            precheck(&task).await,
            Precheck::Finished(Outcome::TransferError {
                reason: FailureReason::UnknownSize { existing: 0 },
                ..
            })
        ));
    }

    #[tokio::test]
    async fn test_quarantine_fills_slots_then_gives_up() {
        let dir = TempDir::new().unwrap();
        let task = task(&dir, Some(10), ControlFlag::QuarantinePrevious);
        let target = task.target_path().to_path_buf();

        write(&target, 10).await;
        assert!(matches!(precheck(&task).await, Precheck::Transfer(ref r) if r.start == 0));
        assert!(quarantine_dir(&target, 0).join("a.nc").is_file());
        assert!(!target.exists());

        write(&target, 10).await;
        assert!(matches!(precheck(&task).await, Precheck::Transfer(_)));
        assert!(quarantine_dir(&target, 1).join("a.nc").is_file());

        write(&target, 10).await;
        assert_eq!(
            precheck(&task).await,
            Precheck::Finished(Outcome::already_present(task.clone()))
        );
        assert_eq!(
            precheck(&task).await,
            Precheck::Finished(Outcome::already_present(task.clone()))
        );
        assert!(target.is_file());
    }

    #[tokio::test]
    async fn test_quarantine_deletes_empty_file() {
        let dir = TempDir::new().unwrap();
        let task = task(&dir, Some(10), ControlFlag::QuarantinePrevious);
        write(task.target_path(), 0).await;

        assert_eq!(quarantine(task.target_path()).await.unwrap(), Quarantine::Deleted);
        assert!(!task.target_path().exists());
        assert!(!quarantine_dir(task.target_path(), 0).exists());
        assert_eq!(quarantine(task.target_path()).await.unwrap(), Quarantine::Missing);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_unwritable_parent_is_io_error() {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new().unwrap();
        let locked = dir.path().join("locked");
        std::fs::create_dir(&locked).unwrap();
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o500)).unwrap();

        let task = Task::new(
            locked.join("sub").join("a.nc"),
            "http://example.org/a.nc",
            Some(1),
            ControlFlag::Normal,
        );
        let result = precheck(&task).await;
        std::fs::set_permissions(&locked, std::fs::Permissions::from_mode(0o700)).unwrap();

        // Root ignores directory permissions.
        if locked.join("sub").exists() {
            return;
        }
        assert!(matches!(result, Precheck::Finished(Outcome::IoError { .. })));
    }
}
