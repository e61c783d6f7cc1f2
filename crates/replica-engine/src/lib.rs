//! # Replica Engine
//!
//! An adaptive concurrent download scheduler for replicating archive files
//! from remote data nodes.
//!
//! Tasks are queued on a priority queue and executed by a pool of workers,
//! each running an external transfer tool under stall supervision. A
//! throughput feedback loop grows and shrinks the pool while it runs.
//!
//! ## Features
//!
//! - `DownloadController` with `submit` / `start` / `stop` / `manage`
//! - Pluggable command-line transports keyed by URL scheme
//! - Resume of partial files and quarantine of known-bad ones
//! - Stall detection with graceful-then-forced termination
//! - Aggregated results with optional bounded retry
//!

pub mod autoscale;
pub mod config;
pub mod controller;
pub mod error;
pub mod outcome;
pub mod precheck;
pub mod queue;
pub mod results;
pub mod task;
pub mod transport;
pub mod utils;
pub mod worker;

pub use autoscale::{Autoscaler, ScaleDecision, ScalePhase};
pub use config::{AutoscaleConfig, SchedulerConfig, SlowSourceRule, SupervisorConfig};
pub use controller::{BenchmarkCallback, BenchmarkSample, DownloadController};
pub use error::{Error, Result};
pub use outcome::{FailureReason, Outcome};
pub use precheck::{Precheck, Quarantine};
pub use queue::TaskQueue;
pub use results::{AggregateResults, FailedTransfer, FailureKind, ResultAggregator};
pub use task::{ControlFlag, Payload, Priority, QueueEntry, Task};
pub use transport::{
    CommandTransport, CommandTransportConfig, Credentials, SessionExit, TransferRequest, Transport,
    TransportRegistry, TransportSession,
};
pub use worker::{ResultSink, WorkerHandle, WorkerState};
