//! Scheduler configuration.
//!
//! Durations are stored as `_ms` / `_secs` integers so the structs map
//! one-to-one onto TOML tables; accessor methods return [`Duration`]s.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Default number of workers brought up by `start()`.
pub const DEFAULT_MIN_WORKERS: usize = 2;

/// Default upper bound for the worker pool.
pub const DEFAULT_MAX_WORKERS: usize = 4;

/// Aggregate throughput below which the control loop makes no decision (128 KiB/s).
pub const DEFAULT_FLOOR_BYTES_PER_SEC: f64 = (1u64 << 17) as f64;

/// Top-level configuration for a [`DownloadController`](crate::DownloadController).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Workers started by `start()`.
    pub min_workers: usize,
    /// Hard cap on the worker pool.
    pub max_workers: usize,
    /// Re-submit tasks whose transfer failed.
    pub retry_on_failure: bool,
    /// Maximum re-submissions per target path. `None` retries forever.
    pub max_retries: Option<u32>,
    /// Control loop tuning.
    pub autoscale: AutoscaleConfig,
    /// Transfer supervision tuning.
    pub supervisor: SupervisorConfig,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            min_workers: DEFAULT_MIN_WORKERS,
            max_workers: DEFAULT_MAX_WORKERS,
            retry_on_failure: false,
            max_retries: None,
            autoscale: AutoscaleConfig::default(),
            supervisor: SupervisorConfig::default(),
        }
    }
}

impl SchedulerConfig {
    /// Set the pool bounds.
    pub fn with_workers(mut self, min_workers: usize, max_workers: usize) -> Self {
        self.min_workers = min_workers;
        self.max_workers = max_workers;
        self
    }

    /// Enable retrying failed transfers, optionally bounded.
    pub fn with_retry(mut self, max_retries: Option<u32>) -> Self {
        self.retry_on_failure = true;
        self.max_retries = max_retries;
        self
    }

    /// Check the configuration for values the scheduler cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.max_workers == 0 {
            return Err(Error::config("max_workers must be at least 1"));
        }
        if self.min_workers > self.max_workers {
            return Err(Error::config(format!(
                "min_workers ({}) exceeds max_workers ({})",
                self.min_workers, self.max_workers
            )));
        }
        self.autoscale.validate()?;
        self.supervisor.validate()
    }
}

/// Tuning for the perturb-and-observe control loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoscaleConfig {
    /// Time between control ticks.
    pub tick_interval_ms: u64,
    /// Total throughput below which a tick is skipped.
    pub floor_bytes_per_sec: f64,
    /// Improvement ratio that counts as "the last growth helped".
    pub growth_threshold: f64,
    /// Improvement ratio under which the last growth is reverted.
    pub regression_threshold: f64,
    /// How long a probe may run before it is concluded.
    pub probe_window_secs: u64,
    /// Grow again after this long without a decision.
    pub regrow_after_secs: u64,
    /// At full size, drop a worker after this long to re-test.
    pub chaos_after_secs: u64,
}

impl Default for AutoscaleConfig {
    fn default() -> Self {
        Self {
            tick_interval_ms: 2_000,
            floor_bytes_per_sec: DEFAULT_FLOOR_BYTES_PER_SEC,
            growth_threshold: 1.2,
            regression_threshold: 0.8,
            probe_window_secs: 30,
            regrow_after_secs: 300,
            chaos_after_secs: 600,
        }
    }
}

impl AutoscaleConfig {
    pub fn tick_interval(&self) -> Duration {
        Duration::from_millis(self.tick_interval_ms)
    }

    pub fn probe_window(&self) -> Duration {
        Duration::from_secs(self.probe_window_secs)
    }

    pub fn regrow_after(&self) -> Duration {
        Duration::from_secs(self.regrow_after_secs)
    }

    pub fn chaos_after(&self) -> Duration {
        Duration::from_secs(self.chaos_after_secs)
    }

    fn validate(&self) -> Result<()> {
        if self.tick_interval_ms == 0 {
            return Err(Error::config("autoscale.tick_interval_ms must be positive"));
        }
        if self.regression_threshold > self.growth_threshold {
            return Err(Error::config(
                "autoscale.regression_threshold must not exceed growth_threshold",
            ));
        }
        Ok(())
    }
}

/// A source known to be slow, matched by substring against the URL or target path.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SlowSourceRule {
    pub pattern: String,
    pub poll_interval_ms: u64,
    pub max_stall_rounds: u32,
}

/// Tuning for stall detection and termination of transfer processes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SupervisorConfig {
    /// Grace period after spawning before the first size check.
    pub warmup_ms: u64,
    /// Time between size checks.
    pub poll_interval_ms: u64,
    /// Consecutive unchanged polls tolerated before the transfer is declared stalled.
    pub max_stall_rounds: u32,
    /// Liveness checks after the graceful kill before forcing termination.
    pub max_kill_wait: u32,
    /// Time between liveness checks while waiting for a killed process.
    pub kill_poll_interval_ms: u64,
    /// Per-source widening of the poll interval.
    pub slow_sources: Vec<SlowSourceRule>,
}

impl Default for SupervisorConfig {
    fn default() -> Self {
        Self {
            warmup_ms: 2_000,
            poll_interval_ms: 5_000,
            max_stall_rounds: 10,
            max_kill_wait: 5,
            kill_poll_interval_ms: 3_000,
            slow_sources: vec![SlowSourceRule {
                pattern: "BNU".to_string(),
                poll_interval_ms: 60_000,
                max_stall_rounds: 20,
            }],
        }
    }
}

impl SupervisorConfig {
    pub fn warmup(&self) -> Duration {
        Duration::from_millis(self.warmup_ms)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn kill_poll_interval(&self) -> Duration {
        Duration::from_millis(self.kill_poll_interval_ms)
    }

    /// Upper bound on how long a transfer that never grows keeps running after warm-up.
    ///
    /// The first size check happens when the warm-up ends, so the stall is
    /// declared `max_stall_rounds` polls later.
    pub fn stall_deadline(&self) -> Duration {
        self.poll_interval() * self.max_stall_rounds
            + self.kill_poll_interval() * self.max_kill_wait
    }

    /// Resolve the effective settings for one transfer.
    ///
    /// The first slow-source rule whose pattern occurs in the URL or target
    /// path replaces the poll interval and stall budget.
    pub fn for_transfer(&self, url: &str, target: &Path) -> SupervisorConfig {
        let target = target.to_string_lossy();
        let rule = self
            .slow_sources
            .iter()
            .find(|r| !r.pattern.is_empty() && (url.contains(&r.pattern) || target.contains(&r.pattern)));

        let mut resolved = self.clone();
        if let Some(rule) = rule {
            resolved.poll_interval_ms = rule.poll_interval_ms;
            resolved.max_stall_rounds = rule.max_stall_rounds;
        }
        resolved
    }

    fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 || self.kill_poll_interval_ms == 0 {
            return Err(Error::config("supervisor poll intervals must be positive"));
        }
        if let Some(rule) = self.slow_sources.iter().find(|r| r.poll_interval_ms == 0) {
            return Err(Error::config(format!(
                "slow source rule '{}' has a zero poll interval",
                rule.pattern
            )));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = SchedulerConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.autoscale.floor_bytes_per_sec, 131_072.0);
        assert_eq!(config.supervisor.max_stall_rounds, 10);
        assert!(!config.retry_on_failure);
    }

    #[test]
    fn test_validate_rejects_bad_bounds() {
        let config = SchedulerConfig::default().with_workers(5, 3);
        assert!(matches!(config.validate(), Err(Error::Configuration(_))));

        let config = SchedulerConfig::default().with_workers(0, 0);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_slow_source_widens_polling() {
        let config = SupervisorConfig::default();

        let normal = config.for_transfer("gsiftp://esgf.example.org/a.nc", Path::new("/data/a.nc"));
        assert_eq!(normal.poll_interval_ms, 5_000);
        assert_eq!(normal.max_stall_rounds, 10);

        let slow = config.for_transfer(
            "gsiftp://esgf.example.org/a.nc",
            Path::new("/data/cmip5/output1/BNU/BNU-ESM/a.nc"),
        );
        assert_eq!(slow.poll_interval_ms, 60_000);
        assert_eq!(slow.max_stall_rounds, 20);
    }

    #[test]
    fn test_stall_deadline() {
        let config = SupervisorConfig {
            poll_interval_ms: 100,
            max_stall_rounds: 3,
            max_kill_wait: 2,
            kill_poll_interval_ms: 50,
            ..Default::default()
        };
        assert_eq!(config.stall_deadline(), Duration::from_millis(400));
    }

    #[test]
    fn test_partial_deserialize_keeps_defaults() {
        let config: SchedulerConfig =
            serde_json::from_str(r#"{ "max_workers": 8, "autoscale": { "tick_interval_ms": 500 } }"#)
                .unwrap();
        assert_eq!(config.max_workers, 8);
        assert_eq!(config.min_workers, DEFAULT_MIN_WORKERS);
        assert_eq!(config.autoscale.tick_interval_ms, 500);
        assert_eq!(config.autoscale.chaos_after_secs, 600);
    }
}
