//! Perturb-and-observe sizing of the worker pool.
//!
//! The autoscaler adds a worker, watches whether aggregate throughput
//! improves, and either keeps growing, settles, or takes the worker back. A
//! worker added only because the pool sat unchanged for `regrow_after` is
//! kept only if it beats the growth threshold. At full size it periodically
//! drops a worker to check that the pool is not oversized. It is a pure state machine: the caller supplies the clock and
//! the measurements, and applies the returned [`ScaleDecision`].

use std::time::Instant;

use tracing::{debug, info};

use crate::config::AutoscaleConfig;

/// Where the control loop is in its grow/observe cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScalePhase {
    /// Add a worker at the next eligible tick.
    GrowthPending,
    /// A size change was made; comparing throughput against the baseline.
    Probing,
    /// Settled. Grow again only after `regrow_after`.
    Cooldown,
}

/// What the controller should do after a tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScaleDecision {
    /// No measurement was usable.
    Skip,
    Hold,
    Grow,
    Shrink,
}

/// Control loop state.
#[derive(Debug, Clone)]
pub struct Autoscaler {
    config: AutoscaleConfig,
    max_workers: usize,
    phase: ScalePhase,
    speed_baseline: f64,
    speed_history: Vec<f64>,
    last_decision: Instant,
    /// The current probe was started by the regrow timer.
    timed_probe: bool,
}

impl Autoscaler {
    pub fn new(config: AutoscaleConfig, max_workers: usize, now: Instant) -> Self {
        Self {
            config,
            max_workers,
            phase: ScalePhase::GrowthPending,
            speed_baseline: 0.0,
            speed_history: Vec::new(),
            last_decision: now,
            timed_probe: false,
        }
    }

    pub fn phase(&self) -> ScalePhase {
        self.phase
    }

    pub fn speed_baseline(&self) -> f64 {
        self.speed_baseline
    }

    /// Evaluate one tick.
    ///
    /// `total_speed` is the summed throughput of the `active_workers` that are
    /// transferring; `worker_count` is the pool size including idle workers.
    pub fn tick(
        &mut self,
        now: Instant,
        total_speed: f64,
        worker_count: usize,
        active_workers: usize,
    ) -> ScaleDecision {
        if active_workers == 0 && worker_count > 0 {
            return ScaleDecision::Skip;
        }
        self.speed_history.push(total_speed);
        if active_workers > 0 && total_speed < self.config.floor_bytes_per_sec {
            return ScaleDecision::Skip;
        }

        let elapsed = now.saturating_duration_since(self.last_decision);

        if worker_count < self.max_workers {
            let smoothed = self.smoothed_speed();

            if self.phase == ScalePhase::Probing {
                let improvement = if self.speed_baseline > 0.0 {
                    smoothed / self.speed_baseline
                } else {
                    f64::INFINITY
                };
                debug!(improvement, workers = worker_count, "Probing pool size");

                if improvement > self.config.growth_threshold {
                    self.phase = ScalePhase::GrowthPending;
                } else if elapsed > self.config.probe_window() {
                    self.phase = ScalePhase::Cooldown;
                    if worker_count > 1 && improvement < self.config.regression_threshold {
                        info!(improvement, "Throughput dropped, removing a worker");
                        return ScaleDecision::Shrink;
                    }
                    if worker_count > 1 && self.timed_probe {
                        info!(improvement, "Extra worker did not help, removing it");
                        return ScaleDecision::Shrink;
                    }
                    debug!(workers = worker_count, "No throughput gain, holding pool size");
                }
            }

            if self.phase == ScalePhase::GrowthPending || elapsed > self.config.regrow_after() {
                debug!(baseline = smoothed, "Trying one more worker");
                self.timed_probe = self.phase != ScalePhase::GrowthPending;
                self.speed_baseline = smoothed;
                self.speed_history.clear();
                self.last_decision = now;
                self.phase = ScalePhase::Probing;
                return ScaleDecision::Grow;
            }
        } else if elapsed > self.config.chaos_after() && worker_count > 1 {
            info!(workers = worker_count, "Pool at capacity, dropping a worker to re-test");
            self.timed_probe = false;
            self.last_decision = now;
            self.phase = ScalePhase::Probing;
            return ScaleDecision::Shrink;
        }

        ScaleDecision::Hold
    }

    fn smoothed_speed(&self) -> f64 {
        if self.speed_history.is_empty() {
            0.0
        } else {
            self.speed_history.iter().sum::<f64>() / self.speed_history.len() as f64
        }
    }
}
