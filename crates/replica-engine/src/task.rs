//! Transfer task definitions.
//!
//! A [`Task`] is created by the producer and never modified afterwards; a
//! retry re-submits an identical copy. Tasks travel through the queue wrapped
//! in a [`QueueEntry`] whose [`Payload`] also carries the shutdown sentinel.

use std::cmp::Ordering;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::Error;

/// Scheme assumed for sources given as bare paths.
pub const LOCAL_SCHEME: &str = "file";

/// What the pre-check must do with a file already at the target path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ControlFlag {
    /// Resume or skip based on the existing file's size.
    #[default]
    Normal,
    /// The existing file failed verification; move it aside before downloading again.
    QuarantinePrevious,
}

impl FromStr for ControlFlag {
    type Err = Error;

    /// Parse the control column of a download list (`0` or `-1`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "" | "0" | "normal" => Ok(Self::Normal),
            "-1" | "quarantine" | "quarantine_previous" => Ok(Self::QuarantinePrevious),
            other => Err(Error::Other(format!("unknown control flag '{other}'"))),
        }
    }
}

impl fmt::Display for ControlFlag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Normal => write!(f, "normal"),
            Self::QuarantinePrevious => write!(f, "quarantine_previous"),
        }
    }
}

/// One requested file transfer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    target_path: PathBuf,
    source_url: String,
    expected_size: Option<u64>,
    control_flag: ControlFlag,
}

impl Task {
    pub fn new(
        target_path: impl Into<PathBuf>,
        source_url: impl Into<String>,
        expected_size: Option<u64>,
        control_flag: ControlFlag,
    ) -> Self {
        Self {
            target_path: target_path.into(),
            source_url: source_url.into(),
            expected_size,
            control_flag,
        }
    }

    pub fn target_path(&self) -> &Path {
        &self.target_path
    }

    pub fn source_url(&self) -> &str {
        &self.source_url
    }

    pub fn expected_size(&self) -> Option<u64> {
        self.expected_size
    }

    pub fn control_flag(&self) -> ControlFlag {
        self.control_flag
    }

    /// URL scheme of the source, `file` when the source is a bare path.
    pub fn scheme(&self) -> &str {
        url_scheme(&self.source_url)
    }

    /// Whether the source is a local file rather than a network download.
    pub fn is_local(&self) -> bool {
        self.scheme().eq_ignore_ascii_case(LOCAL_SCHEME)
    }
}

/// Extract the scheme of a URL: the text before the first `:` if it holds no `/`.
pub fn url_scheme(url: &str) -> &str {
    match url.split_once(':') {
        Some((scheme, _)) if !scheme.is_empty() && !scheme.contains('/') => scheme,
        _ => LOCAL_SCHEME,
    }
}

/// Queue priority. Lower values are dequeued first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Priority {
    High = 10,
    Normal = 100,
}

/// What a queue entry asks the dequeuing worker to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Transfer(Task),
    /// The worker that dequeues this exits.
    Shutdown,
}

/// An entry of the task queue.
#[derive(Debug, Clone)]
pub struct QueueEntry {
    pub priority: Priority,
    /// Submission order, used as a FIFO tie-breaker within a priority.
    pub seq: u64,
    pub payload: Payload,
}

impl QueueEntry {
    pub fn is_shutdown(&self) -> bool {
        matches!(self.payload, Payload::Shutdown)
    }
}

impl PartialEq for QueueEntry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for QueueEntry {}

impl Ord for QueueEntry {
    // BinaryHeap is a max-heap: the "greatest" entry has the lowest priority value,
    // then the lowest sequence number.
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for QueueEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}
