use futures_util::StreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_RANGE, RANGE};
use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;

use crate::file::Destination;
use crate::models::DownloadTask;

/// Errors while discovering the resource size.
#[derive(Debug, Error)]
pub enum ProbeError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected status in size probe: {0}")]
    Status(StatusCode),
    #[error("server did not report a Content-Length")]
    MissingLength,
}

/// Errors while fetching a single range.
#[derive(Debug, Error)]
pub enum ChunkError {
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),
    #[error("unexpected status in range response: {0} (expected 206)")]
    Status(StatusCode),
    #[error("unexpected Content-Length in range response: {found:?} (expected {expected})")]
    LengthMismatch { expected: u64, found: Option<u64> },
    #[error("unexpected Content-Range in range response: {found:?} (expected bytes {first}-{last})")]
    RangeMismatch {
        first: u64,
        last: u64,
        found: Option<String>,
    },
    #[error("resource size changed from {expected} to {found} bytes")]
    SizeChanged { expected: u64, found: u64 },
    #[error("range response sent more than the expected {expected} bytes")]
    Overrun { expected: u64 },
    #[error("wrote {written}, expected to write {expected}")]
    ShortWrite { written: u64, expected: u64 },
    #[error("failed to write response: {0}")]
    Io(#[from] std::io::Error),
}

fn declared_length(response: &Response) -> Option<u64> {
    response
        .headers()
        .get(CONTENT_LENGTH)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| s.trim().parse::<u64>().ok())
}

/// A parsed `Content-Range: bytes first-last/total` value. `total` is `None`
/// when the server sends `*`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct ContentRange {
    first: u64,
    last: u64,
    total: Option<u64>,
}

fn parse_content_range(value: &str) -> Option<ContentRange> {
    let (range, total) = value.trim().strip_prefix("bytes ")?.split_once('/')?;
    let (first, last) = range.split_once('-')?;
    let total = match total.trim() {
        "*" => None,
        n => Some(n.parse().ok()?),
    };
    Some(ContentRange {
        first: first.trim().parse().ok()?,
        last: last.trim().parse().ok()?,
        total,
    })
}

/// Checks that the server answered with exactly the requested range of a
/// resource that still has the probed size.
fn check_content_range(
    response: &Response,
    task: DownloadTask,
    total_size: u64,
) -> Result<(), ChunkError> {
    let raw = response
        .headers()
        .get(CONTENT_RANGE)
        .and_then(|v| v.to_str().ok());
    let matching = raw
        .and_then(parse_content_range)
        .filter(|r| r.first == task.offset && r.last == task.last_byte());
    let Some(range) = matching else {
        return Err(ChunkError::RangeMismatch {
            first: task.offset,
            last: task.last_byte(),
            found: raw.map(str::to_string),
        });
    };
    match range.total {
        Some(found) if found != total_size => Err(ChunkError::SizeChanged {
            expected: total_size,
            found,
        }),
        _ => Ok(()),
    }
}

/// Gets the size of the resource with a HEAD request.
pub async fn probe_size(
    client: &Client,
    url: &str,
    timeout: Option<Duration>,
) -> Result<u64, ProbeError> {
    let mut request = client.head(url);
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }
    let resp = request.send().await?;
    if !resp.status().is_success() {
        return Err(ProbeError::Status(resp.status()));
    }
    // Read the header itself: for HEAD responses the body is empty, so the
    // body-derived length is always zero.
    declared_length(&resp).ok_or(ProbeError::MissingLength)
}

/// Downloads `task`'s byte range and writes it at the same offset in `dest`.
///
/// `total_size` is the probed size; a response describing a different total
/// fails the chunk.
pub async fn fetch_chunk(
    client: &Client,
    url: &str,
    task: DownloadTask,
    total_size: u64,
    dest: &Arc<Destination>,
    timeout: Option<Duration>,
) -> Result<(), ChunkError> {
    let mut request = client
        .get(url)
        .header(RANGE, format!("bytes={}-{}", task.offset, task.last_byte()));
    if let Some(timeout) = timeout {
        request = request.timeout(timeout);
    }
    let resp = request.send().await?;

    if resp.status() != StatusCode::PARTIAL_CONTENT {
        return Err(ChunkError::Status(resp.status()));
    }

    let found = declared_length(&resp);
    if found != Some(task.size) {
        return Err(ChunkError::LengthMismatch {
            expected: task.size,
            found,
        });
    }
    check_content_range(&resp, task, total_size)?;

    let mut written = 0u64;
    let mut stream = resp.bytes_stream();
    while let Some(chunk) = stream.next().await {
        let bytes = chunk?;
        if bytes.is_empty() {
            continue;
        }
        let len = bytes.len() as u64;
        if written + len > task.size {
            return Err(ChunkError::Overrun {
                expected: task.size,
            });
        }
        dest.write_at(task.offset + written, bytes).await?;
        written += len;
    }

    if written != task.size {
        return Err(ChunkError::ShortWrite {
            written,
            expected: task.size,
        });
    }
    Ok(())
}
