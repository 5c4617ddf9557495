// SPDX-License-Identifier: MIT
//! Error taxonomy for the streaming and sync core.
//!
//! The split matters to callers: `Transport` and `Persistence` are
//! recoverable (the user may retry the whole turn), `Denied` is fatal for
//! the operation and must never be retried past. Malformed frames are not
//! errors at all; they are absorbed as `Unrecognized` events inside the
//! decoder and only surface in diagnostics counters.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    /// Connection drop, non-2xx response before any frame, or a chunk read
    /// failure mid-stream. Partial accumulated text is preserved locally but
    /// never committed.
    #[error("transport failure: {0}")]
    Transport(String),

    /// The capability check rejected the operation (401/403). Fatal for the
    /// whole user action; no retry.
    #[error("operation denied by authorization gate")]
    Denied,

    /// The authoritative store rejected a write. When this happens after a
    /// successful stream the local record stays in local identity, flagged
    /// failed, awaiting a manual retry.
    #[error("persistence failure: {0}")]
    Persistence(#[from] sqlx::Error),

    /// A mutation referenced a record the store does not hold.
    #[error("record not found: {0}")]
    NotFound(String),
}

impl SyncError {
    /// Whether the caller may sensibly retry the whole operation.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, SyncError::Denied)
    }
}

impl From<reqwest::Error> for SyncError {
    fn from(err: reqwest::Error) -> Self {
        match err.status() {
            Some(status)
                if status == reqwest::StatusCode::UNAUTHORIZED
                    || status == reqwest::StatusCode::FORBIDDEN =>
            {
                SyncError::Denied
            }
            _ => SyncError::Transport(err.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn denied_is_not_recoverable() {
        assert!(!SyncError::Denied.is_recoverable());
        assert!(SyncError::Transport("connection reset".into()).is_recoverable());
        assert!(SyncError::NotFound("m-1".into()).is_recoverable());
    }
}
