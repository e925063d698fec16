// src/models.rs

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::manager::DownloadError;

/// Default number of concurrent workers.
pub const DEFAULT_WORKERS: usize = 4;
/// Default number of bytes requested per ranged GET.
pub const DEFAULT_CHUNK_SIZE: u64 = 1024 * 1024;

/// One contiguous byte range of the remote resource.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DownloadTask {
    pub offset: u64,
    pub size: u64,
}

impl DownloadTask {
    /// Last byte covered by this task, inclusive, as used in a `Range` header.
    pub fn last_byte(&self) -> u64 {
        self.offset + self.size - 1
    }
}

/// Splits `[0, total_size)` into consecutive tasks of `chunk_size` bytes.
/// The last task is shorter when `chunk_size` does not divide `total_size`.
///
/// `chunk_size` must be positive; a zero chunk size yields no tasks.
pub fn partition(total_size: u64, chunk_size: u64) -> impl Iterator<Item = DownloadTask> {
    let mut position = 0u64;
    std::iter::from_fn(move || {
        if chunk_size == 0 || position >= total_size {
            return None;
        }
        let size = chunk_size.min(total_size - position);
        let task = DownloadTask { offset: position, size };
        position += size;
        Some(task)
    })
}

/// Options for a single parallel download.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct DownloadOptions {
    pub url: String,
    pub destination: PathBuf,
    /// Number of workers pulling chunks from the shared queue.
    pub workers: usize,
    /// Bytes per ranged request. The last chunk may be shorter.
    pub chunk_size: u64,
    /// Per-request timeout. `None` leaves requests unbounded.
    pub timeout_secs: Option<u64>,
    pub user_agent: String,
}

impl Default for DownloadOptions {
    fn default() -> Self {
        Self {
            url: String::new(),
            destination: PathBuf::new(),
            workers: DEFAULT_WORKERS,
            chunk_size: DEFAULT_CHUNK_SIZE,
            timeout_secs: None,
            user_agent: concat!("rangefetch/", env!("CARGO_PKG_VERSION")).to_string(),
        }
    }
}

impl DownloadOptions {
    pub fn new(url: impl Into<String>, destination: impl Into<PathBuf>) -> Self {
        Self {
            url: url.into(),
            destination: destination.into(),
            ..Self::default()
        }
    }

    pub fn workers(mut self, workers: usize) -> Self {
        self.workers = workers;
        self
    }

    pub fn chunk_size(mut self, chunk_size: u64) -> Self {
        self.chunk_size = chunk_size;
        self
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_secs.map(Duration::from_secs)
    }

    /// Rejects options the engine cannot run with.
    pub fn validate(&self) -> Result<(), DownloadError> {
        if self.url.is_empty() {
            return Err(DownloadError::InvalidOptions("url is empty".into()));
        }
        if self.destination.as_os_str().is_empty() {
            return Err(DownloadError::InvalidOptions("destination is empty".into()));
        }
        if self.workers == 0 {
            return Err(DownloadError::InvalidOptions("workers must be >= 1".into()));
        }
        if self.chunk_size == 0 {
            return Err(DownloadError::InvalidOptions("chunk size must be >= 1".into()));
        }
        Ok(())
    }
}

/// What a successful download did.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct DownloadSummary {
    pub total_size: u64,
    /// Number of tasks produced.
    pub chunks: u64,
    /// Tasks that were fetched successfully.
    pub fetched: u64,
    /// Tasks consumed without network work after cancellation.
    pub drained: u64,
}
