//! Transport trait and related types.

use std::path::PathBuf;

use tokio::process::Command;

use crate::Result;

/// The byte range of one transfer, as resolved by the pre-check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TransferRequest {
    /// Source URL.
    pub url: String,
    /// Local destination file.
    pub target_path: PathBuf,
    /// First byte to fetch (non-zero when resuming).
    pub start: u64,
    /// End of the range, exclusive. `None` when the size is unknown.
    pub end: Option<u64>,
}

impl TransferRequest {
    pub fn new(
        url: impl Into<String>,
        target_path: impl Into<PathBuf>,
        start: u64,
        end: Option<u64>,
    ) -> Self {
        Self {
            url: url.into(),
            target_path: target_path.into(),
            start,
            end,
        }
    }

    /// Number of bytes requested, when the end is known.
    pub fn length(&self) -> Option<u64> {
        self.end.map(|end| end.saturating_sub(self.start))
    }

    pub fn is_resume(&self) -> bool {
        self.start > 0
    }

    /// Whether the request names an explicit end beyond the start.
    pub fn has_range(&self) -> bool {
        self.end.is_some_and(|end| end > self.start)
    }
}

/// An external transfer tool for one URL scheme.
///
/// A transport only knows how to describe the process that fetches a byte
/// range. Spawning, stall supervision and termination belong to
/// [`TransportSession`](super::TransportSession), so every transport gets the
/// same guarantees without implementing them.
pub trait Transport: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Build the process that writes `request.target_path`.
    ///
    /// The process must exit with status 0 exactly when the range was
    /// transferred completely.
    fn command(&self, request: &TransferRequest) -> Result<Command>;
}
