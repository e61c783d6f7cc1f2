//! Structured results reported by workers.

use std::fmt;

use crate::task::Task;

/// Why a transfer did not complete.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// The transport process exited with a non-zero code.
    TransportExit { code: i32 },
    /// The target stopped growing and the process was terminated.
    Stalled,
    /// The transfer was killed by a forced stop.
    Cancelled,
    /// The existing file is larger than the expected size.
    SizeMismatch { existing: u64, expected: u64 },
    /// A file exists but the expected size is unknown, so it cannot be resumed.
    UnknownSize { existing: u64 },
    /// No transport could be built or spawned for the task.
    Transport(String),
    /// The worker caught a panic while handling the task.
    Panicked(String),
}

impl FailureReason {
    /// Whether a retry could plausibly succeed.
    ///
    /// Pre-check refusals depend only on the file on disk and would fail the
    /// same way again.
    pub fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Cancelled | Self::SizeMismatch { .. } | Self::UnknownSize { .. }
        )
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::TransportExit { code } => write!(f, "transport exited with code {code}"),
            Self::Stalled => write!(f, "transfer stalled"),
            Self::Cancelled => write!(f, "transfer cancelled"),
            Self::SizeMismatch { existing, expected } => write!(
                f,
                "existing file is {existing} bytes, larger than the expected {expected}"
            ),
            Self::UnknownSize { existing } => write!(
                f,
                "existing file is {existing} bytes and the expected size is unknown"
            ),
            Self::Transport(msg) => write!(f, "{msg}"),
            Self::Panicked(msg) => write!(f, "worker panicked: {msg}"),
        }
    }
}

/// Terminal result of one dequeued entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// The target holds the complete file.
    Done {
        task: Task,
        /// Bytes transferred for this task, 0 when nothing was fetched.
        bytes: u64,
        /// The file was already complete and no transport ran.
        already_present: bool,
    },
    /// The transfer failed; may be retried.
    TransferError { task: Task, reason: FailureReason },
    /// A local filesystem operation failed; never retried.
    IoError { task: Task, reason: String },
    /// A worker consumed a shutdown sentinel.
    Stopped { worker_id: usize },
}

impl Outcome {
    pub fn already_present(task: Task) -> Self {
        Self::Done {
            task,
            bytes: 0,
            already_present: true,
        }
    }

    pub fn task(&self) -> Option<&Task> {
        match self {
            Self::Done { task, .. } | Self::TransferError { task, .. } | Self::IoError { task, .. } => {
                Some(task)
            }
            Self::Stopped { .. } => None,
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Done { .. })
    }
}
