//! Result aggregation and retry.
//!
//! Every worker reports through one [`ResultAggregator`]. The whole body of
//! [`ResultAggregator::on_result`] runs under a single lock; re-submitting a
//! task only pushes onto the queue and never waits.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tracing::{debug, error, warn};

use crate::outcome::{FailureReason, Outcome};
use crate::queue::TaskQueue;
use crate::task::Task;
use crate::worker::ResultSink;

/// Which stage a recorded failure came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Transfer,
    Io,
}

/// A transfer that ended in failure and was not retried.
#[derive(Debug, Clone, Serialize)]
pub struct FailedTransfer {
    pub target_path: PathBuf,
    pub source_url: String,
    pub reason: String,
    pub kind: FailureKind,
    pub failed_at: DateTime<Utc>,
}

impl FailedTransfer {
    fn new(task: &Task, reason: String, kind: FailureKind) -> Self {
        Self {
            target_path: task.target_path().to_path_buf(),
            source_url: task.source_url().to_string(),
            reason,
            kind,
            failed_at: Utc::now(),
        }
    }
}

/// Totals over every outcome reported to a controller.
#[derive(Debug, Clone, Serialize)]
pub struct AggregateResults {
    pub succeeded_count: usize,
    /// Bytes of successful non-local transfers.
    pub succeeded_bytes: u64,
    /// Successful transfers excluding local copies.
    pub succeeded_download_count: usize,
    pub failed_count: usize,
    pub failed_details: Vec<FailedTransfer>,
    pub retried_count: usize,
    pub stopped_workers: usize,
    pub start_time: DateTime<Utc>,
}

impl AggregateResults {
    fn new() -> Self {
        Self {
            succeeded_count: 0,
            succeeded_bytes: 0,
            succeeded_download_count: 0,
            failed_count: 0,
            failed_details: Vec::new(),
            retried_count: 0,
            stopped_workers: 0,
            start_time: Utc::now(),
        }
    }

    /// Time since aggregation started.
    pub fn elapsed(&self) -> Duration {
        (Utc::now() - self.start_time).to_std().unwrap_or_default()
    }

    /// Downloaded bytes per second since aggregation started.
    pub fn average_speed(&self) -> f64 {
        let secs = self.elapsed().as_secs_f64();
        if secs > 0.0 {
            self.succeeded_bytes as f64 / secs
        } else {
            0.0
        }
    }

    fn record_failure(&mut self, failure: FailedTransfer) {
        self.failed_count += 1;
        self.failed_details.push(failure);
    }
}

#[derive(Debug)]
struct AggregatorInner {
    results: AggregateResults,
    retries: HashMap<PathBuf, u32>,
}

/// Lock-protected sink for worker outcomes.
#[derive(Debug)]
pub struct ResultAggregator {
    inner: Mutex<AggregatorInner>,
    queue: Arc<TaskQueue>,
    retry_on_failure: bool,
    max_retries: Option<u32>,
}

impl ResultAggregator {
    /// `max_retries = None` re-submits a failing task for as long as it fails.
    pub fn new(queue: Arc<TaskQueue>, retry_on_failure: bool, max_retries: Option<u32>) -> Self {
        Self {
            inner: Mutex::new(AggregatorInner {
                results: AggregateResults::new(),
                retries: HashMap::new(),
            }),
            queue,
            retry_on_failure,
            max_retries,
        }
    }

    /// Copy of the current totals.
    pub fn snapshot(&self) -> AggregateResults {
        self.inner.lock().results.clone()
    }

    pub fn succeeded_count(&self) -> usize {
        self.inner.lock().results.succeeded_count
    }

    /// Record one outcome, re-submitting the task if it should be retried.
    pub fn on_result(&self, outcome: Outcome) {
        let mut inner = self.inner.lock();
        match outcome {
            Outcome::Stopped { worker_id } => {
                debug!(worker = worker_id, "Worker acknowledged shutdown");
                inner.results.stopped_workers += 1;
            }
            Outcome::Done {
                task,
                bytes,
                already_present,
            } => {
                debug!(target = %task.target_path().display(), already_present, "Done");
                inner.retries.remove(task.target_path());
                inner.results.succeeded_count += 1;
                if !task.is_local() {
                    inner.results.succeeded_bytes += bytes;
                    inner.results.succeeded_download_count += 1;
                }
            }
            Outcome::TransferError { task, reason } => {
                warn!(url = task.source_url(), "The download failed: {}", reason);
                if self.should_retry(&mut inner, &task, &reason) {
                    warn!(url = task.source_url(), "Error downloading, retrying");
                    inner.results.retried_count += 1;
                    self.queue.submit(task);
                } else {
                    error!(url = task.source_url(), "Could not download: {}", reason);
                    inner.retries.remove(task.target_path());
                    let failure = FailedTransfer::new(&task, reason.to_string(), FailureKind::Transfer);
                    inner.results.record_failure(failure);
                }
            }
            Outcome::IoError { task, reason } => {
                error!(target = %task.target_path().display(), "Local IO failure: {}", reason);
                inner
                    .results
                    .record_failure(FailedTransfer::new(&task, reason, FailureKind::Io));
            }
        }
    }

    fn should_retry(&self, inner: &mut AggregatorInner, task: &Task, reason: &FailureReason) -> bool {
        if !self.retry_on_failure || !reason.is_retryable() {
            return false;
        }
        let attempts = inner
            .retries
            .entry(task.target_path().to_path_buf())
            .or_insert(0);
        if self.max_retries.is_some_and(|max| *attempts >= max) {
            return false;
        }
        *attempts += 1;
        true
    }
}

impl ResultSink for ResultAggregator {
    fn on_result(&self, outcome: Outcome) {
        ResultAggregator::on_result(self, outcome);
    }
}
