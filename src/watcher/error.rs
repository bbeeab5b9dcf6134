//! Error types for watch sessions.

use std::path::PathBuf;
use thiserror::Error;

/// Boxed error returned by event handlers.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Errors from watch session operations.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("File system event error: {details}")]
    EventError { details: String },

    #[error("Handler '{handler}' failed for {path}: {source}")]
    HandlerFailed {
        handler: String,
        path: PathBuf,
        #[source]
        source: HandlerError,
    },

    #[error("Handler '{handler}' panicked for {path}")]
    HandlerPanicked { handler: String, path: PathBuf },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}
