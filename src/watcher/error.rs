//! Error types for the watcher and reloader.

use std::path::PathBuf;
use thiserror::Error;

/// Errors from watcher construction, registry notification and reloads.
#[derive(Error, Debug)]
pub enum WatchError {
    #[error("Failed to initialize watcher: {reason}")]
    InitFailed { reason: String },

    #[error("Cannot watch path {path}: {reason}")]
    PathWatchFailed { path: PathBuf, reason: String },

    #[error("File system event error: {details}")]
    EventError { details: String },

    #[error("Reload failed: {reason}")]
    ReloadFailed { reason: String },

    #[error("Registry observer failed: {reason}")]
    ObserverFailed { reason: String },
}

impl From<notify::Error> for WatchError {
    fn from(e: notify::Error) -> Self {
        WatchError::InitFailed {
            reason: e.to_string(),
        }
    }
}

pub type WatchResult<T> = Result<T, WatchError>;
