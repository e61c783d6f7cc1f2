//! Application configuration loaded from TOML.

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use replica_engine::{CommandTransportConfig, SchedulerConfig};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cli::Args;
use crate::error::Result;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Pool, retry, autoscale and supervision settings.
    pub scheduler: SchedulerConfig,
    /// Per-scheme transport commands replacing the built-in ones.
    pub transports: HashMap<String, CommandTransportConfig>,
}

impl AppConfig {
    /// `<config dir>/replica/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("replica").join("config.toml"))
    }

    /// Load from `path`, or from the default location if it exists.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let path = match path {
            Some(path) => path.to_path_buf(),
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => path,
                None => return Ok(Self::default()),
            },
        };
        debug!("Loading configuration from {}", path.display());
        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Apply command-line overrides.
    pub fn apply_args(&mut self, args: &Args) {
        if let Some(min) = args.start_workers {
            self.scheduler.min_workers = min;
        }
        if let Some(max) = args.max_workers {
            self.scheduler.max_workers = max;
        }
        if args.retry || args.max_retries.is_some() {
            self.scheduler.retry_on_failure = true;
        }
        if args.max_retries.is_some() {
            self.scheduler.max_retries = args.max_retries;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    #[test]
    fn test_parse_tables() {
        let config = AppConfig::parse(
            r#"
            [scheduler]
            max_workers = 8
            retry_on_failure = true

            [scheduler.supervisor]
            poll_interval_ms = 10000

            [transports.http]
            program = "curl"
            args = ["--fail", "--silent"]
            resume_args = ["-C", "{start}"]
            trailing_args = ["{url}", "-o", "{target}"]
            "#,
        )
        .unwrap();

        assert_eq!(config.scheduler.max_workers, 8);
        assert_eq!(config.scheduler.min_workers, 2);
        assert!(config.scheduler.retry_on_failure);
        assert_eq!(config.scheduler.supervisor.poll_interval_ms, 10_000);
        assert_eq!(config.scheduler.supervisor.max_stall_rounds, 10);
        assert_eq!(config.transports["http"].program, "curl");
        assert!(config.transports["http"].supports_resume);
    }

    #[test]
    fn test_empty_file_is_default() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.scheduler.max_workers, 4);
        assert!(config.transports.is_empty());
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[scheduler]\nmin_workers = 1\n").unwrap();
        let config = AppConfig::load(Some(&path)).unwrap();
        assert_eq!(config.scheduler.min_workers, 1);

        assert!(AppConfig::load(Some(&dir.path().join("missing.toml"))).is_err());
    }

    #[test]
    fn test_args_override_file() {
        let mut config = AppConfig::default();
        let args = Args::parse_from([
            "replica",
            "--input",
            "list.tsv",
            "--max-workers",
            "6",
            "--max-retries",
            "3",
        ]);
        config.apply_args(&args);
        assert_eq!(config.scheduler.max_workers, 6);
        assert!(config.scheduler.retry_on_failure);
        assert_eq!(config.scheduler.max_retries, Some(3));
    }
}
