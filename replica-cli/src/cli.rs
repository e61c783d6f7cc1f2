use std::path::PathBuf;

use clap::Parser;

/// Replicate archive files listed in a download list.
#[derive(Parser, Debug, Clone)]
#[command(name = "replica", version, about, long_about = None)]
pub struct Args {
    /// Tab-separated download list: url, local path, size[, ..., flag]
    #[arg(short, long)]
    pub input: PathBuf,

    /// Configuration file (defaults to <config dir>/replica/config.toml)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Workers started for each batch
    #[arg(long)]
    pub start_workers: Option<usize>,

    /// Upper bound on concurrent workers
    #[arg(long)]
    pub max_workers: Option<usize>,

    /// Tasks handed to one controller before starting a fresh one
    #[arg(short, long, default_value_t = 20)]
    pub batch_size: usize,

    /// Re-submit failed transfers
    #[arg(long)]
    pub retry: bool,

    /// Give up on a file after this many retries (implies --retry)
    #[arg(long)]
    pub max_retries: Option<u32>,

    /// Log pool status every control tick instead of showing a progress bar
    #[arg(long)]
    pub verbose_benchmark: bool,

    /// Append per-tick benchmark samples to this file as JSON lines
    #[arg(long)]
    pub benchmark_log: Option<PathBuf>,

    /// Write failed transfers to this file as JSON
    #[arg(long)]
    pub failures: Option<PathBuf>,

    /// Also write logs to a daily-rotated file in this directory
    #[arg(long)]
    pub log_dir: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long)]
    pub verbose: bool,

    /// Enable debug logging
    #[arg(short, long)]
    pub debug: bool,

    /// Only log errors
    #[arg(short, long)]
    pub quiet: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_args_are_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_defaults() {
        let args = Args::parse_from(["replica", "--input", "list.tsv"]);
        assert_eq!(args.batch_size, 20);
        assert!(!args.retry);
        assert_eq!(args.max_retries, None);
    }
}
