use std::path::Path;

use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{filter::EnvFilter, fmt, prelude::*};

use crate::cli::Args;
use crate::error::{AppError, Result};

const DEFAULT_LOG_FILTER: &str = "replica=info,replica_engine=info";

fn default_filter(args: &Args) -> &'static str {
    if args.quiet {
        "error"
    } else if args.debug {
        "replica=debug,replica_engine=debug"
    } else if args.verbose {
        "replica=debug,replica_engine=info"
    } else {
        DEFAULT_LOG_FILTER
    }
}

/// Initialize console logging, plus a daily-rotated file in `log_dir` when given.
///
/// The returned guard flushes the file writer; keep it alive until exit.
pub fn init_logging(args: &Args, log_dir: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_filter(args)));

    let (file_layer, guard) = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)?;
            let appender = tracing_appender::rolling::daily(dir, "replica.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            let layer = fmt::layer().with_writer(writer).with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(file_layer)
        .try_init()
        .map_err(|e| AppError::Logging(e.to_string()))?;

    Ok(guard)
}
