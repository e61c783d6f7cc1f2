mod cli;
mod config;
mod error;
mod input;
mod logging;
mod runner;

use std::process;

use clap::Parser;
use tracing::error;

use crate::cli::Args;
use crate::config::AppConfig;
use crate::error::Result;
use crate::runner::RunSummary;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let code = match run(args).await {
        Ok(summary) if summary.interrupted => 1,
        Ok(summary) if summary.all_succeeded() => 0,
        Ok(_) => 2,
        Err(e) => {
            error!("Application error: {}", e);
            eprintln!("Error: {}", e);
            1
        }
    };
    process::exit(code);
}

async fn run(args: Args) -> Result<RunSummary> {
    let _guard = logging::init_logging(&args, args.log_dir.as_deref())?;

    let mut config = AppConfig::load(args.config.as_deref())?;
    config.apply_args(&args);

    runner::run(&args, config).await
}
