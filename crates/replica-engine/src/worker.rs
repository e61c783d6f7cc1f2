//! Pool workers.
//!
//! A worker is a tokio task that loops over the shared queue: dequeue, run
//! the pre-check, supervise the transfer, report the outcome. It handles one
//! task at a time and exits only when it dequeues a shutdown sentinel. A
//! panic while handling a task is caught and reported as a failure.

use std::any::Any;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use futures::FutureExt;
use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::config::SupervisorConfig;
use crate::outcome::{FailureReason, Outcome};
use crate::precheck::{Precheck, precheck};
use crate::queue::TaskQueue;
use crate::task::{Payload, Task};
use crate::transport::{SessionExit, TransferRequest, TransportRegistry, TransportSession};
use crate::utils::fs::written_bytes;

/// Minimum time between two throughput measurements of one worker.
pub const SAMPLE_WINDOW: Duration = Duration::from_secs(1);

/// Receives the outcome of every dequeued entry.
///
/// Called from worker tasks; implementations must not block.
pub trait ResultSink: Send + Sync {
    fn on_result(&self, outcome: Outcome);
}

/// Lifecycle of a worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    Idle,
    Dequeuing,
    Executing,
    Reporting,
    Stopped,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Idle => "idle",
            Self::Dequeuing => "dequeuing",
            Self::Executing => "executing",
            Self::Reporting => "reporting",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// Rolling throughput measurement of the active transfer.
#[derive(Debug, Clone, Copy)]
pub struct ThroughputSample {
    pub last_sample: Instant,
    pub bytes_at_last_sample: u64,
    /// Bytes per second over the last completed window.
    pub cached: f64,
}

impl ThroughputSample {
    fn starting_at(bytes: u64, now: Instant) -> Self {
        Self {
            last_sample: now,
            bytes_at_last_sample: bytes,
            cached: 0.0,
        }
    }
}

#[derive(Debug)]
struct ActiveTransfer {
    target: PathBuf,
    start: u64,
    sample: ThroughputSample,
}

#[derive(Debug)]
struct WorkerShared {
    id: usize,
    state: Mutex<WorkerState>,
    active: Mutex<Option<ActiveTransfer>>,
    cancellation_token: CancellationToken,
}

/// The controller's view of a running worker.
#[derive(Debug, Clone)]
pub struct WorkerHandle {
    shared: Arc<WorkerShared>,
}

impl WorkerHandle {
    fn new(id: usize) -> Self {
        Self {
            shared: Arc::new(WorkerShared {
                id,
                state: Mutex::new(WorkerState::Idle),
                active: Mutex::new(None),
                cancellation_token: CancellationToken::new(),
            }),
        }
    }

    pub fn id(&self) -> usize {
        self.shared.id
    }

    pub fn state(&self) -> WorkerState {
        *self.shared.state.lock()
    }

    /// Whether a transfer process is currently running.
    pub fn is_active(&self) -> bool {
        self.shared.active.lock().is_some()
    }

    pub fn active_target(&self) -> Option<PathBuf> {
        self.shared.active.lock().as_ref().map(|a| a.target.clone())
    }

    /// Bytes written by the active transfer so far.
    pub async fn downloaded_bytes(&self) -> u64 {
        let Some((target, start)) = self
            .shared
            .active
            .lock()
            .as_ref()
            .map(|a| (a.target.clone(), a.start))
        else {
            return 0;
        };
        written_bytes(&target).await.saturating_sub(start)
    }

    /// Mean bytes per second since the previous call, 0 when idle.
    ///
    /// Calls less than [`SAMPLE_WINDOW`] apart return the previous value.
    pub async fn throughput(&self) -> f64 {
        self.throughput_at(Instant::now()).await
    }

    pub async fn throughput_at(&self, now: Instant) -> f64 {
        let (target, last_sample) = {
            let active = self.shared.active.lock();
            let Some(active) = active.as_ref() else {
                return 0.0;
            };
            if now.saturating_duration_since(active.sample.last_sample) < SAMPLE_WINDOW {
                return active.sample.cached;
            }
            (active.target.clone(), active.sample.last_sample)
        };

        // The size is read without holding the lock.
        let current = written_bytes(&target).await;

        let mut active = self.shared.active.lock();
        match active.as_mut() {
            Some(active) if active.target == target && active.sample.last_sample == last_sample => {
                let sample = &mut active.sample;
                let elapsed = now.saturating_duration_since(sample.last_sample);
                sample.cached = current.saturating_sub(sample.bytes_at_last_sample) as f64
                    / elapsed.as_secs_f64();
                sample.bytes_at_last_sample = current;
                sample.last_sample = now;
                sample.cached
            }
            // A new transfer started or another call sampled first.
            Some(active) => active.sample.cached,
            None => 0.0,
        }
    }

    /// Kill the running transfer and any transfer this worker starts afterwards.
    pub fn kill(&self) {
        self.shared.cancellation_token.cancel();
    }

    fn set_state(&self, state: WorkerState) {
        *self.shared.state.lock() = state;
    }

    fn begin(&self, request: &TransferRequest) {
        *self.shared.active.lock() = Some(ActiveTransfer {
            target: request.target_path.clone(),
            start: request.start,
            sample: ThroughputSample::starting_at(request.start, Instant::now()),
        });
    }

    fn finish(&self) {
        *self.shared.active.lock() = None;
    }
}

/// Everything a worker shares with the rest of the pool.
#[derive(Clone)]
pub struct WorkerContext {
    pub queue: Arc<TaskQueue>,
    pub transports: Arc<TransportRegistry>,
    pub supervisor: SupervisorConfig,
    pub sink: Arc<dyn ResultSink>,
}

/// One execution unit of the pool.
pub struct Worker {
    handle: WorkerHandle,
    context: WorkerContext,
}

impl Worker {
    pub fn new(id: usize, context: WorkerContext) -> Self {
        Self {
            handle: WorkerHandle::new(id),
            context,
        }
    }

    pub fn handle(&self) -> WorkerHandle {
        self.handle.clone()
    }

    /// Start the worker loop on the runtime.
    pub fn spawn(self) -> (WorkerHandle, JoinHandle<()>) {
        let handle = self.handle();
        let join = tokio::spawn(self.run());
        (handle, join)
    }

    async fn run(self) {
        let id = self.handle.id();
        debug!(worker = id, "Worker started");

        loop {
            self.handle.set_state(WorkerState::Dequeuing);
            let entry = self.context.queue.pop().await;

            let task = match entry.payload {
                Payload::Shutdown => {
                    self.handle.set_state(WorkerState::Stopped);
                    self.context.sink.on_result(Outcome::Stopped { worker_id: id });
                    self.context.queue.task_done();
                    debug!(worker = id, "Worker stopped");
                    return;
                }
                Payload::Transfer(task) => task,
            };

            self.handle.set_state(WorkerState::Executing);
            let outcome = AssertUnwindSafe(self.process(&task))
                .catch_unwind()
                .await
                .unwrap_or_else(|panic| {
                    let message = panic_message(panic.as_ref());
                    error!(worker = id, target = %task.target_path().display(), "Worker panicked: {}", message);
                    Outcome::TransferError {
                        task: task.clone(),
                        reason: FailureReason::Panicked(message),
                    }
                });
            self.handle.finish();

            self.handle.set_state(WorkerState::Reporting);
            self.context.sink.on_result(outcome);
            self.context.queue.task_done();
            self.handle.set_state(WorkerState::Idle);
        }
    }

    async fn process(&self, task: &Task) -> Outcome {
        let request = match precheck(task).await {
            Precheck::Finished(outcome) => return outcome,
            Precheck::Transfer(request) => request,
        };

        let transport = match self.context.transports.get(task.source_url()) {
            Ok(transport) => transport,
            Err(e) => {
                warn!(worker = self.handle.id(), url = task.source_url(), "{}", e);
                return Outcome::TransferError {
                    task: task.clone(),
                    reason: FailureReason::Transport(e.to_string()),
                };
            }
        };

        debug!(
            worker = self.handle.id(),
            target = %request.target_path.display(),
            start = request.start,
            end = ?request.end,
            "Downloading via {}",
            transport.name()
        );

        self.handle.begin(&request);
        let session = TransportSession::with_cancellation(
            self.context.supervisor.clone(),
            self.handle.shared.cancellation_token.child_token(),
        );
        let result = session.execute(transport.as_ref(), &request).await;
        let appended = written_bytes(&request.target_path)
            .await
            .saturating_sub(request.start);
        self.handle.finish();

        let reason = match result {
            Ok(exit) if exit.is_success() => {
                return Outcome::Done {
                    task: task.clone(),
                    bytes: request.length().unwrap_or(appended),
                    already_present: false,
                };
            }
            Ok(SessionExit::Completed { code }) => FailureReason::TransportExit { code },
            Ok(SessionExit::Stalled) => FailureReason::Stalled,
            Ok(SessionExit::Cancelled) => FailureReason::Cancelled,
            Err(e) => FailureReason::Transport(e.to_string()),
        };
        warn!(
            worker = self.handle.id(),
            url = task.source_url(),
            target = %task.target_path().display(),
            "Transfer failed: {}",
            reason
        );
        Outcome::TransferError {
            task: task.clone(),
            reason,
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
