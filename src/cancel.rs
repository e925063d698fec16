// src/cancel.rs

use std::sync::{Arc, Mutex, PoisonError};
use tokio_util::sync::CancellationToken;

use crate::manager::DownloadError;

/// Per-download cancellation state: a token workers poll before taking new
/// work, plus the first error that caused the cancellation.
///
/// Only the first recorded cause is kept. Later failures are dropped.
#[derive(Debug, Clone)]
pub struct CancelSignal {
    token: CancellationToken,
    cause: Arc<Mutex<Option<DownloadError>>>,
}

impl Default for CancelSignal {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelSignal {
    pub fn new() -> Self {
        Self::with_token(CancellationToken::new())
    }

    /// A signal that is also cancelled when `parent` is.
    pub fn child_of(parent: &CancellationToken) -> Self {
        Self::with_token(parent.child_token())
    }

    fn with_token(token: CancellationToken) -> Self {
        Self {
            token,
            cause: Arc::new(Mutex::new(None)),
        }
    }

    /// Records `cause` unless one is already set, then cancels.
    /// Returns whether this call recorded the cause.
    ///
    /// If the token was already cancelled from outside, `Cancelled` is recorded
    /// instead, so a failure that finishes after the cancellation cannot take
    /// its place.
    pub fn cancel(&self, cause: DownloadError) -> bool {
        let recorded = {
            let mut slot = self.cause.lock().unwrap_or_else(PoisonError::into_inner);
            if slot.is_some() {
                false
            } else if self.token.is_cancelled() {
                *slot = Some(DownloadError::Cancelled);
                false
            } else {
                *slot = Some(cause);
                true
            }
        };
        self.token.cancel();
        recorded
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Resolves the final outcome: the recorded cause, `Cancelled` if the
    /// token fired without one (external cancellation), or `None`.
    pub fn take_cause(&self) -> Option<DownloadError> {
        let cause = self
            .cause
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match cause {
            Some(cause) => Some(cause),
            None if self.token.is_cancelled() => Some(DownloadError::Cancelled),
            None => None,
        }
    }
}
