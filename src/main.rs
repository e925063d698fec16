// src/main.rs

use anyhow::{bail, Context, Result};
use clap::{CommandFactory, Parser};
use rangefetch::prelude::*;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Download a file over HTTP in parallel byte ranges.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// The path to the destination file
    #[arg(long)]
    destination: Option<PathBuf>,
    /// URL of the resource to download
    #[arg(long)]
    url: Option<String>,
    /// Number of parallel workers for the download [default: 4]
    #[arg(long)]
    procs: Option<usize>,
    /// Size to download per HTTP request [default: 1048576]
    #[arg(long)]
    chunk_size: Option<u64>,
    /// JSON file with download options; flags override its values
    #[arg(long)]
    config: Option<PathBuf>,
    /// Log level, overridden by RUST_LOG
    #[arg(long, default_value = "info")]
    log_level: String,
}

fn init_tracing(level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_options(args: &Args) -> Result<DownloadOptions> {
    let mut options = match &args.config {
        Some(path) => {
            let raw = std::fs::read_to_string(path)
                .with_context(|| format!("read config {}", path.display()))?;
            serde_json::from_str::<DownloadOptions>(&raw)
                .with_context(|| format!("parse config {}", path.display()))?
        }
        None => DownloadOptions::default(),
    };

    if let Some(destination) = &args.destination {
        options.destination = destination.clone();
    }
    if let Some(url) = &args.url {
        options.url = url.clone();
    }
    if let Some(procs) = args.procs {
        options.workers = procs;
    }
    if let Some(chunk_size) = args.chunk_size {
        options.chunk_size = chunk_size;
    }

    if options.destination.as_os_str().is_empty() {
        bail!("Please specify a destination file.");
    }
    if options.url.is_empty() {
        bail!("Please specify a URL.");
    }
    options.validate()?;
    Ok(options)
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(&args.log_level);

    let options = match build_options(&args) {
        Ok(options) => options,
        Err(e) => {
            eprintln!("{e:#}");
            let _ = Args::command().print_help();
            return ExitCode::from(1);
        }
    };

    let token = CancellationToken::new();
    let interrupt = {
        let token = token.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling download");
                token.cancel();
            }
        })
    };

    let url = options.url.clone();
    let result = match ParallelDownloader::new(options) {
        Ok(downloader) => downloader.run_with_cancellation(&token).await,
        Err(e) => Err(e),
    };
    interrupt.abort();

    match result {
        Ok(summary) => {
            info!(
                total_size = summary.total_size,
                chunks = summary.chunks,
                "downloaded {}",
                url
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("Failed to download {} : {}", url, e);
            ExitCode::from(2)
        }
    }
}
