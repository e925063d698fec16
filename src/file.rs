// src/file.rs

use bytes::Bytes;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::fs::OpenOptions;

#[derive(Debug, Error)]
pub enum FileError {
    #[error("failed to create {}: {source}", .path.display())]
    Create { path: PathBuf, source: io::Error },
    #[error("failed to extend {} to {size} bytes: {source}", .path.display())]
    Extend {
        path: PathBuf,
        size: u64,
        source: io::Error,
    },
}

/// A pre-sized destination file that accepts writes at arbitrary offsets.
///
/// Workers share it through an `Arc` and write disjoint ranges, so no lock
/// guards the underlying file.
#[derive(Debug)]
pub struct Destination {
    file: std::fs::File,
    path: PathBuf,
    len: u64,
}

/// Creates (or truncates) the file at `path` and extends it to `size` bytes.
///
/// If extending fails the file is removed again before the error is returned.
pub async fn preallocate(path: &Path, size: u64) -> Result<Destination, FileError> {
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .truncate(true)
        .open(path)
        .await
        .map_err(|source| FileError::Create {
            path: path.to_path_buf(),
            source,
        })?;

    if size > 0 {
        if let Err(source) = file.set_len(size).await {
            drop(file);
            if let Err(e) = tokio::fs::remove_file(path).await {
                tracing::warn!("failed to remove {} after extend error: {}", path.display(), e);
            }
            return Err(FileError::Extend {
                path: path.to_path_buf(),
                size,
                source,
            });
        }
    }

    Ok(Destination {
        file: file.into_std().await,
        path: path.to_path_buf(),
        len: size,
    })
}

impl Destination {
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn len(&self) -> u64 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Writes `data` at `offset` on the blocking pool.
    ///
    /// Writes past the preallocated length are rejected; the file is never resized.
    pub async fn write_at(self: &Arc<Self>, offset: u64, data: Bytes) -> io::Result<()> {
        let end = offset.checked_add(data.len() as u64);
        if end.map_or(true, |end| end > self.len) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!(
                    "write of {} bytes at {} exceeds file length {}",
                    data.len(),
                    offset,
                    self.len
                ),
            ));
        }

        let dest = Arc::clone(self);
        tokio::task::spawn_blocking(move || write_all_at(&dest.file, &data, offset))
            .await
            .map_err(io::Error::other)?
    }

    /// Closes the handle and deletes the file.
    pub async fn discard(self) -> io::Result<()> {
        let Destination { file, path, .. } = self;
        drop(file);
        tokio::fs::remove_file(&path).await
    }
}

#[cfg(unix)]
fn write_all_at(file: &std::fs::File, buf: &[u8], offset: u64) -> io::Result<()> {
    use std::os::unix::fs::FileExt;
    file.write_all_at(buf, offset)
}

#[cfg(windows)]
fn write_all_at(file: &std::fs::File, mut buf: &[u8], mut offset: u64) -> io::Result<()> {
    use std::os::windows::fs::FileExt;
    while !buf.is_empty() {
        match file.seek_write(buf, offset) {
            Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
            Ok(n) => {
                buf = &buf[n..];
                offset += n as u64;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
