//! The download controller.
//!
//! [`DownloadController`] owns the queue, the worker pool and the result
//! aggregator. Producers call [`submit`](DownloadController::submit); one
//! caller drives [`manage`](DownloadController::manage), which runs the
//! autoscaling loop until every submitted task has reported.

use std::panic::AssertUnwindSafe;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::autoscale::{Autoscaler, ScaleDecision};
use crate::config::SchedulerConfig;
use crate::queue::TaskQueue;
use crate::results::{AggregateResults, ResultAggregator};
use crate::task::{ControlFlag, Task};
use crate::transport::TransportRegistry;
use crate::worker::{ResultSink, Worker, WorkerContext, WorkerHandle};
use crate::Result;

const MIB: f64 = 1024.0 * 1024.0;

/// One control-tick measurement handed to the benchmark callback.
#[derive(Debug, Clone, Serialize)]
pub struct BenchmarkSample {
    pub timestamp: DateTime<Utc>,
    /// Summed throughput of active workers, bytes per second.
    pub throughput: f64,
    pub succeeded_count: usize,
    pub active_workers: usize,
    pub worker_count: usize,
    pub queued: usize,
}

/// Called once per control tick by [`DownloadController::manage`].
pub type BenchmarkCallback = Box<dyn FnMut(&BenchmarkSample) + Send>;

#[derive(Default)]
struct PoolState {
    workers: Vec<(WorkerHandle, JoinHandle<()>)>,
    /// Workers not yet asked to stop.
    worker_count: usize,
    next_id: usize,
    started: bool,
}

impl PoolState {
    fn clean(&mut self) -> usize {
        let before = self.workers.len();
        self.workers.retain(|(_, join)| !join.is_finished());
        before - self.workers.len()
    }
}

/// Adaptive pool of download workers.
pub struct DownloadController {
    config: SchedulerConfig,
    queue: Arc<TaskQueue>,
    transports: Arc<TransportRegistry>,
    aggregator: Arc<ResultAggregator>,
    pool: Mutex<PoolState>,
}

impl DownloadController {
    /// A controller using the built-in transports.
    pub fn new(config: SchedulerConfig) -> Result<Self> {
        Self::with_transports(config, Arc::new(TransportRegistry::with_defaults()))
    }

    pub fn with_transports(
        config: SchedulerConfig,
        transports: Arc<TransportRegistry>,
    ) -> Result<Self> {
        config.validate()?;
        let queue = Arc::new(TaskQueue::new());
        let aggregator = Arc::new(ResultAggregator::new(
            queue.clone(),
            config.retry_on_failure,
            config.max_retries,
        ));
        info!(
            min_workers = config.min_workers,
            max_workers = config.max_workers,
            "Initialized download controller"
        );
        Ok(Self {
            config,
            queue,
            transports,
            aggregator,
            pool: Mutex::new(PoolState::default()),
        })
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    pub fn transports(&self) -> &Arc<TransportRegistry> {
        &self.transports
    }

    /// Queue a task at normal priority. Never waits.
    pub fn submit(&self, task: Task) {
        self.queue.submit(task);
    }

    pub fn submit_transfer(
        &self,
        target_path: impl Into<PathBuf>,
        source_url: impl Into<String>,
        expected_size: Option<u64>,
        control_flag: ControlFlag,
    ) {
        self.submit(Task::new(target_path, source_url, expected_size, control_flag));
    }

    /// Bring the pool up to `min_workers`. Does nothing if already started.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut pool = self.pool.lock();
        if pool.started {
            return;
        }
        for _ in 0..self.config.min_workers {
            self.add_worker(&mut pool);
        }
        pool.started = true;
    }

    /// Ask every worker to stop after its current task.
    ///
    /// With `force`, running transfers are killed as well; their partial
    /// files are left in place.
    pub fn stop(&self, force: bool) {
        let mut pool = self.pool.lock();
        while pool.worker_count > 0 {
            self.remove_worker(&mut pool);
        }
        pool.started = false;
        if force {
            for (handle, _) in &pool.workers {
                handle.kill();
            }
        }
    }

    /// [`stop`](Self::stop) and wait for every worker task to exit.
    pub async fn shutdown(&self, force: bool) {
        self.stop(force);
        let workers = std::mem::take(&mut self.pool.lock().workers);
        for (handle, join) in workers {
            if let Err(e) = join.await {
                error!(worker = handle.id(), "Worker task failed: {}", e);
            }
        }
    }

    /// Run the control loop until every submitted task has reported.
    ///
    /// Starts the pool if needed. With `verbose`, a status line is logged
    /// every tick and a summary at the end.
    pub async fn manage(&self, verbose: bool, mut benchmark: Option<BenchmarkCallback>) {
        self.start();
        let tick_interval = self.config.autoscale.tick_interval();
        let mut scaler = Autoscaler::new(
            self.config.autoscale.clone(),
            self.config.max_workers,
            Instant::now(),
        );

        while !self.queue.is_empty() {
            tokio::select! {
                _ = self.queue.join() => break,
                _ = tokio::time::sleep(tick_interval) => {}
            }

            let tick = self.control_tick(&mut scaler, verbose, benchmark.as_mut());
            let ticked = AssertUnwindSafe(tick).catch_unwind().await;
            if ticked.is_err() {
                error!("Control tick panicked, continuing");
            }
        }

        debug!("The queue is empty, waiting for the last transfers to finish");
        self.queue.join().await;

        if verbose {
            self.log_summary();
        }
    }

    async fn control_tick(
        &self,
        scaler: &mut Autoscaler,
        verbose: bool,
        benchmark: Option<&mut BenchmarkCallback>,
    ) {
        let (handles, worker_count) = {
            let mut pool = self.pool.lock();
            pool.clean();
            let handles: Vec<WorkerHandle> =
                pool.workers.iter().map(|(handle, _)| handle.clone()).collect();
            (handles, pool.worker_count)
        };
        let mut speeds = Vec::with_capacity(handles.len());
        for handle in handles.iter().filter(|h| h.is_active()) {
            speeds.push(handle.throughput().await);
        }
        let total_speed: f64 = speeds.iter().sum();
        let results = self.aggregator.snapshot();

        if verbose {
            let per_worker: Vec<String> =
                speeds.iter().map(|s| format!("{:.2}", s / MIB)).collect();
            info!(
                "{} active workers at {:.2} MB/s ({:.2} Mbps) [{}]. done: {}, failed: {}, queued: {}",
                speeds.len(),
                total_speed / MIB,
                total_speed * 8.0 / 1_000_000.0,
                per_worker.join(", "),
                results.succeeded_count,
                results.failed_count,
                self.queue.len()
            );
        }

        if let Some(callback) = benchmark {
            callback(&BenchmarkSample {
                timestamp: Utc::now(),
                throughput: total_speed,
                succeeded_count: results.succeeded_count,
                active_workers: speeds.len(),
                worker_count,
                queued: self.queue.len(),
            });
        }

        debug!(
            active = speeds.len(),
            workers = worker_count,
            speed = total_speed,
            done = results.succeeded_count,
            failed = results.failed_count,
            queued = self.queue.len(),
            "Control tick"
        );

        match scaler.tick(Instant::now(), total_speed, worker_count, speeds.len()) {
            ScaleDecision::Grow => {
                let mut pool = self.pool.lock();
                self.add_worker(&mut pool);
            }
            ScaleDecision::Shrink => {
                let mut pool = self.pool.lock();
                self.remove_worker(&mut pool);
            }
            ScaleDecision::Hold | ScaleDecision::Skip => {}
        }
    }

    fn log_summary(&self) {
        let results = self.aggregator.snapshot();
        let elapsed = results.elapsed().as_secs_f64();
        info!("Completed download at {}", Utc::now().to_rfc2822());
        info!(
            "downloaded {} files, {:.1} MB in {:.0} seconds",
            results.succeeded_download_count,
            results.succeeded_bytes as f64 / MIB,
            elapsed
        );
        if elapsed > 0.0 {
            let speed = results.average_speed();
            info!(
                "Average speed {:.1} MB/s, {:.0} Mb/s",
                speed / MIB,
                speed * 8.0 / 1_000_000.0
            );
        }
    }

    fn add_worker(&self, pool: &mut PoolState) {
        if pool.worker_count >= self.config.max_workers {
            return;
        }
        let id = pool.next_id;
        pool.next_id += 1;
        pool.worker_count += 1;

        let context = WorkerContext {
            queue: self.queue.clone(),
            transports: self.transports.clone(),
            supervisor: self.config.supervisor.clone(),
            sink: self.aggregator.clone() as Arc<dyn ResultSink>,
        };
        let (handle, join) = Worker::new(id, context).spawn();
        pool.workers.push((handle, join));
        info!(worker = id, workers = pool.worker_count, "Added worker");
    }

    fn remove_worker(&self, pool: &mut PoolState) {
        pool.clean();
        if pool.worker_count == 0 {
            return;
        }
        pool.worker_count -= 1;
        self.queue.push_shutdown();
        info!(workers = pool.worker_count, "Removing a worker");
    }

    /// Snapshot of the aggregated results.
    pub fn results(&self) -> AggregateResults {
        self.aggregator.snapshot()
    }

    /// Workers in the pool, excluding those already asked to stop.
    pub fn worker_count(&self) -> usize {
        self.pool.lock().worker_count
    }

    /// Workers currently running a transfer.
    pub fn active_workers(&self) -> usize {
        self.pool
            .lock()
            .workers
            .iter()
            .filter(|(handle, _)| handle.is_active())
            .count()
    }

    /// Tasks waiting in the queue.
    pub fn queued(&self) -> usize {
        self.queue.len()
    }
}

impl Drop for DownloadController {
    fn drop(&mut self) {
        let pool = self.pool.get_mut();
        pool.clean();
        if pool.worker_count > 0 || !pool.workers.is_empty() {
            debug!("Controller dropped with live workers, forcing stop");
            self.stop(true);
        }
    }
}
