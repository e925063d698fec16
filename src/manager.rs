// src/manager.rs

use futures_util::future::join_all;
use reqwest::Client;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::cancel::CancelSignal;
use crate::downloader::{fetch_chunk, probe_size, ChunkError, ProbeError};
use crate::file::{preallocate, Destination, FileError};
use crate::models::{partition, DownloadOptions, DownloadSummary};
use crate::queue::{task_queue, TaskQueue};

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("invalid download options: {0}")]
    InvalidOptions(String),
    #[error("failed to determine resource size: {0}")]
    Probe(#[from] ProbeError),
    #[error("failed to prepare destination: {0}")]
    File(#[from] FileError),
    #[error("chunk at offset {offset} ({size} bytes) failed: {source}")]
    Chunk {
        offset: u64,
        size: u64,
        #[source]
        source: ChunkError,
    },
    #[error("download cancelled")]
    Cancelled,
    #[error("download worker panicked: {0}")]
    Worker(#[from] tokio::task::JoinError),
}

/// Downloads one resource in fixed-size ranges through a pool of workers.
#[derive(Debug, Clone)]
pub struct ParallelDownloader {
    client: Client,
    options: DownloadOptions,
}

/// State shared by every worker of one download.
struct WorkerContext {
    client: Client,
    options: DownloadOptions,
    dest: Arc<Destination>,
    signal: CancelSignal,
    fetched: AtomicU64,
    drained: AtomicU64,
}

impl ParallelDownloader {
    /// Validates `options` and builds an HTTP client for them.
    pub fn new(options: DownloadOptions) -> Result<Self, DownloadError> {
        options.validate()?;
        let client = Client::builder()
            .user_agent(options.user_agent.clone())
            .build()
            .map_err(|e| DownloadError::InvalidOptions(format!("http client: {e}")))?;
        Ok(Self { client, options })
    }

    /// Uses a caller-provided client instead of building one.
    pub fn with_client(client: Client, options: DownloadOptions) -> Result<Self, DownloadError> {
        options.validate()?;
        Ok(Self { client, options })
    }

    pub async fn run(&self) -> Result<DownloadSummary, DownloadError> {
        self.run_with_cancellation(&CancellationToken::new()).await
    }

    /// Runs the download. Cancelling `parent` stops workers from starting new
    /// chunks; requests already in flight are allowed to finish.
    ///
    /// On failure the destination file does not exist afterwards.
    pub async fn run_with_cancellation(
        &self,
        parent: &CancellationToken,
    ) -> Result<DownloadSummary, DownloadError> {
        let signal = CancelSignal::child_of(parent);
        if signal.is_cancelled() {
            return Err(DownloadError::Cancelled);
        }

        let url = &self.options.url;
        let total_size = probe_size(&self.client, url, self.options.timeout()).await?;
        info!(url = %url, total_size, "resource size probed");

        let dest = Arc::new(preallocate(&self.options.destination, total_size).await?);

        let ctx = Arc::new(WorkerContext {
            client: self.client.clone(),
            options: self.options.clone(),
            dest: Arc::clone(&dest),
            signal: signal.clone(),
            fetched: AtomicU64::new(0),
            drained: AtomicU64::new(0),
        });

        let (sender, queue) = task_queue();
        let workers: Vec<_> = (0..self.options.workers)
            .map(|id| {
                let ctx = Arc::clone(&ctx);
                let queue = queue.clone();
                tokio::spawn(worker(id, ctx, queue))
            })
            .collect();
        drop(queue);

        let mut chunks = 0u64;
        for task in partition(total_size, self.options.chunk_size) {
            if sender.send(task).await.is_err() {
                // Every worker is gone; only possible if they all panicked.
                break;
            }
            chunks += 1;
        }
        drop(sender);

        for joined in join_all(workers).await {
            if let Err(e) = joined {
                signal.cancel(DownloadError::Worker(e));
            }
        }

        let summary = DownloadSummary {
            total_size,
            chunks,
            fetched: ctx.fetched.load(Ordering::SeqCst),
            drained: ctx.drained.load(Ordering::SeqCst),
        };
        drop(ctx);

        if let Some(cause) = signal.take_cause() {
            warn!(url = %url, error = %cause, "download failed, removing destination");
            cleanup(dest).await;
            return Err(cause);
        }

        info!(
            url = %url,
            destination = %self.options.destination.display(),
            chunks = summary.chunks,
            "download complete"
        );
        Ok(summary)
    }
}

/// Pulls tasks until the queue closes. Once the download is cancelled the
/// remaining tasks are still taken, but only counted, so the producer never
/// blocks on a stopped worker.
async fn worker(id: usize, ctx: Arc<WorkerContext>, queue: TaskQueue) {
    while let Some(task) = queue.next().await {
        if ctx.signal.is_cancelled() {
            ctx.drained.fetch_add(1, Ordering::SeqCst);
            debug!(worker = id, offset = task.offset, "drained");
            continue;
        }

        let result = fetch_chunk(
            &ctx.client,
            &ctx.options.url,
            task,
            ctx.dest.len(),
            &ctx.dest,
            ctx.options.timeout(),
        )
        .await;

        match result {
            Ok(()) => {
                ctx.fetched.fetch_add(1, Ordering::SeqCst);
                debug!(worker = id, offset = task.offset, size = task.size, "chunk written");
            }
            Err(source) => {
                let err = DownloadError::Chunk {
                    offset: task.offset,
                    size: task.size,
                    source,
                };
                debug!(worker = id, error = %err, "chunk failed");
                if ctx.signal.cancel(err) {
                    warn!(
                        worker = id,
                        offset = task.offset,
                        "first chunk failure, cancelling download"
                    );
                }
            }
        }
    }
}

/// Closes and deletes the destination once all workers have exited.
async fn cleanup(dest: Arc<Destination>) {
    let path = dest.path().to_path_buf();
    let removed = match Arc::try_unwrap(dest) {
        Ok(dest) => dest.discard().await,
        Err(dest) => {
            drop(dest);
            tokio::fs::remove_file(&path).await
        }
    };
    if let Err(e) = removed {
        warn!("failed to remove incomplete file {}: {}", path.display(), e);
    }
}

/// Convenience wrapper: build a downloader for `options` and run it.
pub async fn parallel_download(options: DownloadOptions) -> Result<DownloadSummary, DownloadError> {
    ParallelDownloader::new(options)?.run().await
}
