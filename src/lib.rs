pub mod cancel;
pub mod downloader;
pub mod file;
pub mod manager;
pub mod models;
pub mod queue;

pub use manager::{parallel_download, DownloadError, ParallelDownloader};

/// Convenient type alias exposing common structs.
pub mod prelude {
    pub use crate::cancel::CancelSignal;
    pub use crate::downloader::{ChunkError, ProbeError};
    pub use crate::file::{Destination, FileError};
    pub use crate::manager::{parallel_download, DownloadError, ParallelDownloader};
    pub use crate::models::{DownloadOptions, DownloadSummary, DownloadTask};
    pub use tokio_util::sync::CancellationToken;
}
