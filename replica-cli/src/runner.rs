//! Batch driver: feeds the download list to a fresh controller per batch.

use std::fs::File;
use std::io::{BufReader, Write};
use std::sync::Arc;
use std::time::Duration;

use indicatif::{ProgressBar, ProgressStyle};
use replica_engine::{
    BenchmarkCallback, BenchmarkSample, DownloadController, FailedTransfer, Task,
    TransportRegistry,
};
use tracing::{error, info, warn};

use crate::cli::Args;
use crate::config::AppConfig;
use crate::error::Result;
use crate::input::read_tasks;

/// Totals over every batch.
#[derive(Debug, Default)]
pub struct RunSummary {
    pub total: usize,
    pub succeeded: usize,
    pub downloaded_files: usize,
    pub downloaded_bytes: u64,
    pub failed: Vec<FailedTransfer>,
    pub interrupted: bool,
}

impl RunSummary {
    pub fn all_succeeded(&self) -> bool {
        self.failed.is_empty() && !self.interrupted
    }
}

fn progress_bar(total: usize) -> ProgressBar {
    let bar = ProgressBar::new(total as u64);
    let style = ProgressStyle::with_template(
        "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} files {msg}",
    )
    .unwrap_or_else(|_| ProgressStyle::default_bar())
    .progress_chars("#>-");
    bar.set_style(style);
    bar.enable_steady_tick(Duration::from_millis(200));
    bar
}

/// Build the per-tick callback: progress bar and/or benchmark log.
fn benchmark_callback(
    bar: Option<ProgressBar>,
    offset: usize,
    log: Option<File>,
) -> Option<BenchmarkCallback> {
    if bar.is_none() && log.is_none() {
        return None;
    }
    let mut log = log;
    Some(Box::new(move |sample: &BenchmarkSample| {
        if let Some(bar) = &bar {
            bar.set_position((offset + sample.succeeded_count) as u64);
            bar.set_message(format!(
                "{:.2} MB/s, {} active",
                sample.throughput / 1024.0 / 1024.0,
                sample.active_workers
            ));
        }
        if let Some(file) = log.as_mut() {
            let written = serde_json::to_writer(&mut *file, sample)
                .map_err(std::io::Error::from)
                .and_then(|_| writeln!(file));
            if let Err(e) = written {
                warn!("Failed to write benchmark sample: {}", e);
            }
        }
    }))
}

async fn run_batch(
    args: &Args,
    config: &AppConfig,
    transports: &Arc<TransportRegistry>,
    batch: &[Task],
    callback: Option<BenchmarkCallback>,
    summary: &mut RunSummary,
) -> Result<()> {
    let controller =
        DownloadController::with_transports(config.scheduler.clone(), transports.clone())?;
    for task in batch {
        controller.submit(task.clone());
    }

    tokio::select! {
        _ = controller.manage(args.verbose_benchmark, callback) => {
            controller.shutdown(false).await;
        }
        _ = tokio::signal::ctrl_c() => {
            warn!("Interrupted, stopping all transfers");
            controller.shutdown(true).await;
            summary.interrupted = true;
        }
    }

    let results = controller.results();
    summary.succeeded += results.succeeded_count;
    summary.downloaded_files += results.succeeded_download_count;
    summary.downloaded_bytes += results.succeeded_bytes;
    if !results.failed_details.is_empty() {
        error!("{} files failed in this batch", results.failed_details.len());
        summary.failed.extend(results.failed_details);
    }
    Ok(())
}

/// Download everything in the input list.
pub async fn run(args: &Args, config: AppConfig) -> Result<RunSummary> {
    config.scheduler.validate()?;
    let tasks = read_tasks(BufReader::new(File::open(&args.input)?))?;
    let transports = Arc::new(TransportRegistry::with_defaults());
    transports.apply_overrides(&config.transports);

    let mut summary = RunSummary {
        total: tasks.len(),
        ..Default::default()
    };
    info!(
        "{} transfers from {} ({} per batch)",
        tasks.len(),
        args.input.display(),
        args.batch_size
    );

    let benchmark_log = match &args.benchmark_log {
        Some(path) => Some(
            std::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(path)?,
        ),
        None => None,
    };
    let bar = (!args.verbose_benchmark && !args.quiet).then(|| progress_bar(tasks.len()));

    let batch_size = if args.batch_size == 0 {
        tasks.len().max(1)
    } else {
        args.batch_size
    };
    for batch in tasks.chunks(batch_size) {
        let log = match &benchmark_log {
            Some(file) => Some(file.try_clone()?),
            None => None,
        };
        let callback = benchmark_callback(bar.clone(), summary.succeeded, log);
        run_batch(args, &config, &transports, batch, callback, &mut summary).await?;
        if let Some(bar) = &bar {
            bar.set_position(summary.succeeded as u64);
        }
        if summary.interrupted {
            break;
        }
    }
    if let Some(bar) = &bar {
        bar.finish_and_clear();
    }

    for failure in &summary.failed {
        warn!(
            "{} -> {}: {}",
            failure.source_url,
            failure.target_path.display(),
            failure.reason
        );
    }
    if let Some(path) = &args.failures {
        let file = File::create(path)?;
        serde_json::to_writer_pretty(file, &summary.failed)?;
    }

    info!(
        "{} of {} files succeeded ({} downloaded, {:.1} MB), {} failed",
        summary.succeeded,
        summary.total,
        summary.downloaded_files,
        summary.downloaded_bytes as f64 / 1024.0 / 1024.0,
        summary.failed.len()
    );
    Ok(summary)
}
